//! Reader: turns source text into [`Value`] trees.
//!
//! Reading happens in two stages. [`tokenize`] splits the text into a queue
//! of tokens, where each parenthesis is its own token and anything else
//! between whitespace is an atom. [`parse`] then consumes tokens from the
//! front of that queue, one expression per call.
//!
//! There is no string literal, comment or `'x` shorthand syntax at this
//! layer. Comments are stripped by the loader before reading.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    sequence::preceded,
};
use std::collections::VecDeque;

use crate::ast::{Number, Value};
use crate::{Error, MAX_PARSE_DEPTH, ParseErrorKind};

/// Token queue consumed front to back by [`parse`]
pub type Tokens = VecDeque<String>;

/// Configuration for parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseConfig {
    /// Maximum list nesting accepted before failing with
    /// [`ParseErrorKind::TooDeeplyNested`]
    pub max_depth: usize,
}

impl Default for ParseConfig {
    fn default() -> Self {
        ParseConfig {
            max_depth: MAX_PARSE_DEPTH,
        }
    }
}

fn is_atom_char(c: char) -> bool {
    !c.is_whitespace() && c != '(' && c != ')'
}

/// One token, skipping any leading whitespace
fn token(input: &str) -> IResult<&str, &str> {
    preceded(
        take_while(char::is_whitespace),
        alt((tag("("), tag(")"), take_while1(is_atom_char))),
    )
    .parse(input)
}

/// Split source text into tokens
pub fn tokenize(text: &str) -> Tokens {
    let mut tokens = Tokens::new();
    let mut rest = text;
    // Only trailing whitespace is left once `token` stops matching
    while let Ok((remaining, tok)) = token(rest) {
        tokens.push_back(tok.to_owned());
        rest = remaining;
    }
    tokens
}

/// Classify an atom token: integer, then float, then boolean, else symbol.
///
/// Float syntax follows the usual decimal forms plus `inf` and `nan`, so
/// every float the printer emits reads back as a float.
pub fn atom(token: &str) -> Value {
    if let Ok(n) = token.parse::<i64>() {
        return Value::Number(Number::Integer(n));
    }
    if let Ok(x) = token.parse::<f64>() {
        return Value::Number(Number::Float(x));
    }
    match token {
        "#t" => Value::Bool(true),
        "#f" => Value::Bool(false),
        _ => Value::Symbol(token.to_owned()),
    }
}

/// Parse one expression from the front of `tokens`
pub fn parse(tokens: &mut Tokens) -> Result<Value, Error> {
    parse_with_config(tokens, &ParseConfig::default())
}

/// Parse one expression from the front of `tokens` with an explicit nesting limit
pub fn parse_with_config(tokens: &mut Tokens, config: &ParseConfig) -> Result<Value, Error> {
    parse_expr(tokens, config.max_depth, 0)
}

fn parse_expr(tokens: &mut Tokens, max_depth: usize, depth: usize) -> Result<Value, Error> {
    let Some(token) = tokens.pop_front() else {
        return Err(unexpected_end());
    };

    match token.as_str() {
        "(" => {
            if depth >= max_depth {
                return Err(Error::syntax(
                    ParseErrorKind::TooDeeplyNested,
                    &format!("Expression too deeply nested (max depth: {max_depth})"),
                    None,
                ));
            }
            let mut items = Vec::new();
            loop {
                match tokens.front().map(String::as_str) {
                    Some(")") => {
                        tokens.pop_front();
                        return Ok(Value::list(items));
                    }
                    Some(_) => items.push(parse_expr(tokens, max_depth, depth + 1)?),
                    None => return Err(unexpected_end()),
                }
            }
        }
        ")" => Err(Error::syntax(
            ParseErrorKind::InvalidSyntax,
            "unexpected close paren",
            Some(")"),
        )),
        _ => Ok(atom(&token)),
    }
}

fn unexpected_end() -> Error {
    Error::syntax(ParseErrorKind::Incomplete, "unexpected end of input", None)
}

/// Read the first expression in `text`; anything after it is ignored.
pub fn read(text: &str) -> Result<Value, Error> {
    parse(&mut tokenize(text))
}

/// Read every expression in `text`
pub fn read_all(text: &str) -> Result<Vec<Value>, Error> {
    let mut tokens = tokenize(text);
    let mut exprs = Vec::new();
    while !tokens.is_empty() {
        exprs.push(parse(&mut tokens)?);
    }
    Ok(exprs)
}
