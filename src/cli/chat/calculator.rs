//! Arithmetic evaluation for math-classified messages.
//!
//! Input is first reduced to the characters of plain arithmetic (digits,
//! whitespace, `.`, `+ - * / ( )`) and then parsed with a small grammar that
//! only knows numbers, the four operators and grouping. Nothing else in the
//! message is ever interpreted.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use winnow::ascii::multispace0;
use winnow::combinator::{alt, delimited, preceded, repeat};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::take_while;

/// Deepest permitted nesting of parentheses and unary signs.
pub const MAX_DEPTH: usize = 100;

static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^0-9+\-*/().\s]").expect("valid sanitizer pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("nothing to evaluate")]
    Empty,
    #[error("malformed expression")]
    Malformed,
    #[error("division by zero")]
    DivisionByZero,
    #[error("expression nested deeper than {MAX_DEPTH} levels")]
    TooDeep,
    #[error("result is not a finite number")]
    NonFinite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Num(f64),
    Neg(Box<Expr>),
    /// A left-associative run of operators sharing one precedence level.
    /// Depth grows only with grouping, never with the number of operators.
    Chain(Box<Expr>, Vec<(Op, Expr)>),
}

/// Strip every character that is not part of plain arithmetic.
pub fn sanitize(input: &str) -> String {
    DISALLOWED.replace_all(input, "").into_owned()
}

/// Evaluate the arithmetic contained in `input`.
pub fn evaluate(input: &str) -> Result<f64, EvalError> {
    let sanitized = sanitize(input);
    if sanitized.trim().is_empty() {
        return Err(EvalError::Empty);
    }
    if nesting_depth(&sanitized) > MAX_DEPTH {
        return Err(EvalError::TooDeep);
    }

    let ast = delimited(multispace0, expr, multispace0)
        .parse(sanitized.as_str())
        .map_err(|_| EvalError::Malformed)?;

    let value = eval(&ast)?;
    if !value.is_finite() {
        return Err(EvalError::NonFinite);
    }
    Ok(value)
}

/// Render a result the way a person would write it: `4` rather than `4.0`.
pub fn format_number(value: f64) -> String {
    // `0 * -1` is negative zero, which nobody writes as "-0"
    let value = if value == 0.0 { 0.0 } else { value };
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

// Upper bound on recursion: open parentheses plus sign characters that could
// chain as unary operators.
fn nesting_depth(s: &str) -> usize {
    let mut depth = 0usize;
    let mut max = 0usize;
    let mut signs = 0usize;
    for c in s.chars() {
        match c {
            '(' => {
                depth += 1;
                max = max.max(depth + signs);
            }
            ')' => depth = depth.saturating_sub(1),
            '+' | '-' => {
                signs += 1;
                max = max.max(depth + signs);
            }
            c if c.is_whitespace() => {}
            _ => signs = 0,
        }
    }
    max
}

fn eval(expr: &Expr) -> Result<f64, EvalError> {
    Ok(match expr {
        Expr::Num(n) => *n,
        Expr::Neg(e) => -eval(e)?,
        Expr::Chain(first, rest) => {
            let mut acc = eval(first)?;
            for (op, operand) in rest {
                let rhs = eval(operand)?;
                acc = match op {
                    Op::Add => acc + rhs,
                    Op::Sub => acc - rhs,
                    Op::Mul => acc * rhs,
                    Op::Div if rhs == 0.0 => return Err(EvalError::DivisionByZero),
                    Op::Div => acc / rhs,
                };
            }
            acc
        }
    })
}

fn chain(first: Expr, rest: Vec<(Op, Expr)>) -> Expr {
    if rest.is_empty() {
        first
    } else {
        Expr::Chain(Box::new(first), rest)
    }
}

fn expr(i: &mut &str) -> ModalResult<Expr> {
    let first = term.parse_next(i)?;
    let rest = repeat(0.., (ws(additive), term)).parse_next(i)?;
    Ok(chain(first, rest))
}

fn term(i: &mut &str) -> ModalResult<Expr> {
    let first = factor.parse_next(i)?;
    let rest = repeat(0.., (ws(multiplicative), factor)).parse_next(i)?;
    Ok(chain(first, rest))
}

fn additive(i: &mut &str) -> ModalResult<Op> {
    alt(('+'.value(Op::Add), '-'.value(Op::Sub))).parse_next(i)
}

fn multiplicative(i: &mut &str) -> ModalResult<Op> {
    alt(('*'.value(Op::Mul), '/'.value(Op::Div))).parse_next(i)
}

fn factor(i: &mut &str) -> ModalResult<Expr> {
    alt((
        preceded(ws('-'), factor).map(|e| Expr::Neg(Box::new(e))),
        preceded(ws('+'), factor),
        atom,
    ))
    .parse_next(i)
}

fn atom(i: &mut &str) -> ModalResult<Expr> {
    alt((number, delimited(ws('('), expr, ws(')')))).parse_next(i)
}

fn number(i: &mut &str) -> ModalResult<Expr> {
    ws(take_while(1.., |c: char| c.is_ascii_digit() || c == '.'))
        .try_map(str::parse::<f64>)
        .map(Expr::Num)
        .parse_next(i)
}

fn ws<'a, O, P>(inner: P) -> impl Parser<&'a str, O, ErrMode<ContextError>>
where
    P: Parser<&'a str, O, ErrMode<ContextError>>,
{
    delimited(multispace0, inner, multispace0)
}
