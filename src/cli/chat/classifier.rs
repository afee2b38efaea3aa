use std::fmt;

/// Words that suggest the answer depends on live or recent information.
const REAL_TIME_KEYWORDS: &[&str] = &[
    "current",
    "latest",
    "recent",
    "today",
    "now",
    "this week",
    "new",
    "price of",
    "news",
    "update",
    "weather",
    "forecast",
    "stock",
    "bitcoin",
    "ethereum",
    "crypto",
    "score",
    "live",
    "just happened",
];

/// Words and symbols that suggest arithmetic.
const MATH_KEYWORDS: &[&str] = &[
    "calculate",
    "solve",
    "what is",
    "times",
    "plus",
    "minus",
    "divided by",
    "multiplied by",
    "^",
    "/",
    "*",
    "+",
    "-",
    "equation",
    "root of",
    "log",
    "sin",
    "cos",
    "tan",
    "derivative",
    "integral",
    "pi",
    "math",
    "=",
];

const EXIT_PHRASES: &[&str] = &["quit", "exit", "goodbye", "bye"];

/// Which handler a message is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Search,
    Math,
    General,
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QueryKind::Search => "search",
            QueryKind::Math => "math",
            QueryKind::General => "general",
        })
    }
}

/// Classify a message by keyword. Real-time keywords win over math keywords
/// when both appear.
pub fn classify(text: &str) -> QueryKind {
    let lower = text.to_lowercase();
    if contains_any(&lower, REAL_TIME_KEYWORDS) {
        QueryKind::Search
    } else if contains_any(&lower, MATH_KEYWORDS) {
        QueryKind::Math
    } else {
        QueryKind::General
    }
}

/// True when the whole message is one of the farewell phrases.
pub fn is_farewell(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    EXIT_PHRASES.contains(&lower.as_str())
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}
