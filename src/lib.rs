//! sexpeval - minimal embeddable Scheme-like expression interpreter
//!
//! This crate reads parenthesized symbolic expressions into a [`Value`] tree and
//! evaluates them against a chain of lexical [`Environment`]s. It is meant to be
//! embedded as a small scripting or rule language, not to be a full Scheme.
//!
//! ```scheme
//! (define square (lambda (x) (* x x)))
//! (square 12)                      ; 144
//! (if (> 2 1) 'yes 'no)            ; yes
//! (begin (define n 0) (set! n (+ n 1)) n)
//! ```
//!
//! ## Evaluation model
//!
//! - Every value is truthy except `#f` and the empty list `()`
//! - Closures capture their defining environment by reference, so later
//!   `define`/`set!` in that scope are visible inside the closure
//! - Closures and primitives are strictly arity checked
//! - `eq?` compares identity, `equal?` compares structure
//! - Parse nesting and evaluation depth are bounded (see [`MAX_PARSE_DEPTH`]
//!   and [`MAX_EVAL_DEPTH`]) so runaway input yields an error instead of
//!   exhausting the native stack
//!
//! There is no tail-call elimination, no continuations, no macros and no
//! numeric tower beyond 64-bit integers and floats.
//!
//! ## Modules
//!
//! - `ast`: runtime values and the canonical printer
//! - `reader`: tokenizer and recursive-descent parser
//! - `environment`: lexical scopes
//! - `evaluator`: special forms and procedure application
//! - `builtinops`: special-form dispatch table and primitive library
//! - `loader`: evaluating whole source files

use std::fmt;

/// Default maximum nesting depth accepted by the reader
pub const MAX_PARSE_DEPTH: usize = 256;

/// Default maximum evaluation depth.
/// Every nested evaluation step counts, so a recursive closure uses a few
/// levels per call.
pub const MAX_EVAL_DEPTH: usize = 512;

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ParseErrorKind {
    /// Unexpected token, such as a close paren with no matching open
    InvalidSyntax,
    /// Input ended before the expression was complete
    Incomplete,
    /// Expression nesting exceeded the configured parse depth
    TooDeeplyNested,
}

/// A structured error describing a reader failure.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// The offending token, if there was one
    pub found: Option<String>,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, message: impl Into<String>, found: Option<String>) -> Self {
        ParseError {
            kind,
            message: message.into(),
            found,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(found) = &self.found {
            write!(f, " (found '{found}')")?;
        }
        Ok(())
    }
}

/// Error types for the interpreter
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("SyntaxError: {0}")]
    SyntaxError(ParseError),
    #[error("EvaluationError: {0}")]
    EvalError(String),
    #[error("Type error: {0}")]
    TypeError(String),
    #[error("Unbound variable: {0}")]
    UnboundVariable(String),
    #[error("ArityError: {}", arity_message(.expected, .got, .expression))]
    ArityError {
        expected: usize,
        got: usize,
        expression: Option<String>,
    },
    #[error("I/O error: {0}")]
    Io(String),
}

fn arity_message(expected: &usize, got: &usize, expression: &Option<String>) -> String {
    match expression {
        Some(expr) => format!("expression {expr}: expected {expected} arguments, got {got}"),
        None => format!("function expected {expected} arguments but got {got}"),
    }
}

impl Error {
    /// Create an ArityError without expression context
    pub fn arity_error(expected: usize, got: usize) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: None,
        }
    }

    /// Create an ArityError with expression context
    pub fn arity_error_with_expr(expected: usize, got: usize, expression: String) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: Some(expression),
        }
    }

    pub(crate) fn syntax(kind: ParseErrorKind, message: &str, found: Option<&str>) -> Self {
        Error::SyntaxError(ParseError::new(kind, message, found.map(str::to_owned)))
    }
}

pub mod ast;
pub mod builtinops;
pub mod environment;
pub mod evaluator;
pub mod loader;
pub mod reader;

pub use ast::{Value, to_text};
pub use environment::Environment;
pub use evaluator::{
    EvalConfig, apply, create_global_env, eval, eval_with_config, make_root_environment,
};
pub use loader::{load_file, load_str};
pub use reader::{ParseConfig, parse, parse_with_config, read, read_all, tokenize};
