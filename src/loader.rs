//! Evaluating whole programs from text or files.

use std::path::Path;

use tracing::debug;

use crate::Error;
use crate::ast::Value;
use crate::environment::Environment;
use crate::evaluator::eval;
use crate::reader::read_all;

/// Remove `;` line comments. Everything from a `;` to the end of its line is
/// dropped; line breaks are kept.
pub fn strip_comments(text: &str) -> String {
    text.split_inclusive('\n')
        .map(|line| match line.find(';') {
            Some(start) if line.ends_with('\n') => format!("{}\n", &line[..start]),
            Some(start) => line[..start].to_owned(),
            None => line.to_owned(),
        })
        .collect()
}

/// Evaluate every expression in `text` in order, returning the last value.
///
/// The first error stops evaluation; definitions made before it remain in
/// `env`. An empty program evaluates to [`Value::Unspecified`].
pub fn load_str(text: &str, env: &Environment) -> Result<Value, Error> {
    let exprs = read_all(&strip_comments(text))?;
    debug!(expressions = exprs.len(), "loading program");

    let mut result = Value::Unspecified;
    for expr in &exprs {
        result = eval(expr, env)?;
    }
    Ok(result)
}

/// Read a source file and evaluate it with [`load_str`]
pub fn load_file(path: impl AsRef<Path>, env: &Environment) -> Result<Value, Error> {
    let path = path.as_ref();
    debug!(path = %path.display(), "loading file");
    let text = std::fs::read_to_string(path)
        .map_err(|err| Error::Io(format!("{}: {err}", path.display())))?;
    load_str(&text, env)
}
