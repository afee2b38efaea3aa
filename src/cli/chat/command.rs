use std::fmt;

/// A provider whose API key can be set at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    OpenAi,
    Serper,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Service::OpenAi => "OpenAI",
            Service::Serper => "Serper",
        })
    }
}

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Help,
    Clear,
    History,
    Quit,
    SetKey { service: Service, value: Option<&'a str> },
    /// A slash command that isn't recognised, or `/key` used incorrectly.
    Invalid(String),
    Chat(&'a str),
}

impl<'a> Command<'a> {
    pub fn parse(line: &'a str) -> Self {
        let trimmed = line.trim();
        let Some(rest) = trimmed.strip_prefix('/') else {
            return Command::Chat(trimmed);
        };

        let mut parts = rest.split_whitespace();
        match parts.next().unwrap_or("") {
            "help" => Command::Help,
            "clear" => Command::Clear,
            "history" => Command::History,
            "quit" => Command::Quit,
            "key" => {
                let service = match parts.next().map(str::to_lowercase).as_deref() {
                    Some("openai") => Service::OpenAi,
                    Some("serper") => Service::Serper,
                    _ => return Command::Invalid("usage: /key openai|serper [value]".to_string()),
                };
                Command::SetKey {
                    service,
                    value: parts.next(),
                }
            }
            other => Command::Invalid(format!("unknown command: /{other}")),
        }
    }
}
