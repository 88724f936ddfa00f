//! This module defines the runtime value type shared by the reader and the
//! evaluator. A [`Value`] is either an atom (number, symbol, boolean), a list,
//! or a procedure. Lists double as syntax tree nodes: the reader produces them
//! and the evaluator decides, by looking at the leading symbol, whether a list
//! is a special form or a procedure call.
//!
//! Two notions of equality are kept apart. [`Value::is_identical`] is identity
//! (backing `eq?`): lists and procedures are shared behind reference-counted
//! pointers and compare by allocation. `PartialEq` is structural (backing
//! `equal?`). The [`Display`](std::fmt::Display) impl is the canonical printer;
//! its output re-reads to an equal value for anything built from numbers,
//! booleans, symbols and lists.

use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::Error;
use crate::environment::Environment;
use crate::evaluator::intooperation::OperationFn;

/// Numeric values: exact 64-bit integers or floats.
///
/// Integer arithmetic is checked and reports overflow instead of wrapping.
/// Mixing an integer with a float promotes to float.
#[derive(Debug, Clone, Copy)]
pub enum Number {
    Integer(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            // Lossy above 2^53, as in any float promotion
            Number::Integer(n) => n as f64,
            Number::Float(x) => x,
        }
    }

    pub(crate) fn checked_add(self, other: Number) -> Result<Number, Error> {
        match (self, other) {
            (Number::Integer(a), Number::Integer(b)) => a
                .checked_add(b)
                .map(Number::Integer)
                .ok_or_else(|| Error::EvalError("Integer overflow in addition".into())),
            (a, b) => Ok(Number::Float(a.as_f64() + b.as_f64())),
        }
    }

    pub(crate) fn checked_sub(self, other: Number) -> Result<Number, Error> {
        match (self, other) {
            (Number::Integer(a), Number::Integer(b)) => a
                .checked_sub(b)
                .map(Number::Integer)
                .ok_or_else(|| Error::EvalError("Integer overflow in subtraction".into())),
            (a, b) => Ok(Number::Float(a.as_f64() - b.as_f64())),
        }
    }

    pub(crate) fn checked_mul(self, other: Number) -> Result<Number, Error> {
        match (self, other) {
            (Number::Integer(a), Number::Integer(b)) => a
                .checked_mul(b)
                .map(Number::Integer)
                .ok_or_else(|| Error::EvalError("Integer overflow in multiplication".into())),
            (a, b) => Ok(Number::Float(a.as_f64() * b.as_f64())),
        }
    }

    /// True division, always producing a float.
    pub(crate) fn checked_div(self, other: Number) -> Result<Number, Error> {
        let divisor = other.as_f64();
        if divisor == 0.0 {
            return Err(Error::EvalError("Division by zero".into()));
        }
        Ok(Number::Float(self.as_f64() / divisor))
    }

    pub(crate) fn checked_neg(self) -> Result<Number, Error> {
        match self {
            Number::Integer(n) => n
                .checked_neg()
                .map(Number::Integer)
                .ok_or_else(|| Error::EvalError("Integer overflow in negation".into())),
            Number::Float(x) => Ok(Number::Float(-x)),
        }
    }

    pub(crate) fn checked_abs(self) -> Result<Number, Error> {
        match self {
            Number::Integer(n) => n
                .checked_abs()
                .map(Number::Integer)
                .ok_or_else(|| Error::EvalError("Integer overflow in abs".into())),
            Number::Float(x) => Ok(Number::Float(x.abs())),
        }
    }

    /// Numeric ordering across integer and float; `None` when a NaN is involved.
    pub fn numeric_cmp(self, other: Number) -> Option<Ordering> {
        match (self, other) {
            (Number::Integer(a), Number::Integer(b)) => Some(a.cmp(&b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }
}

/// Exactness-preserving equality: `Integer(1)` and `Float(1.0)` differ.
/// Use [`Number::numeric_cmp`] for the numeric `=`.
impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Number::Integer(a), Number::Integer(b)) => a == b,
            (Number::Float(a), Number::Float(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Integer(n) => write!(f, "{n}"),
            // Debug keeps a fractional part or exponent ("1.0", "1e20"), so the
            // text reads back as a float rather than an integer.
            Number::Float(x) => write!(f, "{x:?}"),
        }
    }
}

/// A user-defined procedure: parameter names, a body expression and the
/// environment that was active when the `lambda` was evaluated.
pub struct Lambda {
    pub params: Vec<String>,
    pub body: Value,
    pub env: Environment,
}

/// Core value type of the interpreter
///
/// To build values, use the ergonomic helper functions:
/// - `val(42)`, `val(2.5)`, `val(true)` for atoms, `sym("name")` for symbols
/// - `nil()` for the empty list
/// - `val([1, 2, 3])` for homogeneous lists
/// - `val(vec![sym("op"), val(42)])` for mixed lists
#[derive(Clone)]
pub enum Value {
    Number(Number),
    /// Symbols (identifiers), case-sensitive
    Symbol(String),
    Bool(bool),
    /// Lists, shared by reference. The empty list is also the falsy terminator;
    /// there is no separate nil object and no pair type.
    List(Rc<[Value]>),
    /// Built-in procedures implemented in Rust.
    /// The id is the name the procedure was registered under.
    BuiltinFunction {
        id: String,
        func: Arc<OperationFn>,
    },
    /// Closures created by `lambda`
    Function(Rc<Lambda>),
    /// Result of forms evaluated only for effect (e.g. `define`).
    /// Never equal to anything, including itself.
    Unspecified,
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(Number::Integer(n)) => write!(f, "Integer({n})"),
            Value::Number(Number::Float(x)) => write!(f, "Float({x:?})"),
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::List(list) => {
                write!(f, "List(")?;
                for (i, v) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v:?}")?;
                }
                write!(f, ")")
            }
            Value::BuiltinFunction { id, .. } => write!(f, "BuiltinFunction({id})"),
            // The captured environment is left out: it can contain this very closure.
            Value::Function(lambda) => write!(
                f,
                "Function(params={:?}, body={:?})",
                lambda.params, lambda.body
            ),
            Value::Unspecified => write!(f, "Unspecified"),
        }
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        Value::Number(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Number(Number::Float(x))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Number(Number::Integer(i64::from(n)))
            }
        }
    };
}

impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(i64);
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::list(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::list(arr.into_iter().map(Into::into).collect())
    }
}

/// Helper function for creating symbols
pub fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::Symbol(name.as_ref().to_owned())
}

/// Helper function for creating Values from anything convertible
pub fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// Helper function for creating the empty list
pub fn nil() -> Value {
    Value::list(Vec::new())
}

/// Render a value in its canonical textual form.
///
/// For values built only from numbers, booleans, symbols and lists the output
/// reads back (via [`crate::read`]) to an equal value. Procedures render as
/// opaque `#<...>` markers.
pub fn to_text(value: &Value) -> String {
    value.to_string()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Symbol(s) => write!(f, "{s}"),
            Value::Bool(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            Value::List(elements) => {
                write!(f, "(")?;
                for (i, elem) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{elem}")?;
                }
                write!(f, ")")
            }
            Value::BuiltinFunction { id, .. } => write!(f, "#<builtin-function:{id}>"),
            Value::Function(_) => write!(f, "#<function>"),
            Value::Unspecified => write!(f, "#<unspecified>"),
        }
    }
}

impl Value {
    pub fn list(elements: Vec<Value>) -> Value {
        Value::List(Rc::from(elements))
    }

    /// Check if a value represents nil (empty list)
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::List(list) if list.is_empty())
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(_))
    }

    pub fn is_symbol(&self) -> bool {
        matches!(self, Value::Symbol(_))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Number(_))
    }

    pub fn is_procedure(&self) -> bool {
        matches!(self, Value::BuiltinFunction { .. } | Value::Function(_))
    }

    /// Everything is true except `#f` and the empty list.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Bool(false)) && !self.is_nil()
    }

    /// Identity comparison, as used by `eq?`.
    ///
    /// Atoms compare by value (numbers must also agree on exactness). All
    /// empty lists are the same object; any other list or procedure is only
    /// identical to itself.
    pub fn is_identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                (a.is_empty() && b.is_empty()) || Rc::ptr_eq(a, b)
            }
            (Value::BuiltinFunction { func: f1, .. }, Value::BuiltinFunction { func: f2, .. }) => {
                Arc::ptr_eq(f1, f2)
            }
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Structural equality, as used by `equal?`. Procedures have no structure to
/// compare and fall back to identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::BuiltinFunction { .. }, Value::BuiltinFunction { .. })
            | (Value::Function(_), Value::Function(_)) => self.is_identical(other),
            (Value::Unspecified, _) | (_, Value::Unspecified) => false,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helper_functions_data_driven() {
        let test_cases = vec![
            (val(42), Value::Number(Number::Integer(42))),
            (val(-17), Value::Number(Number::Integer(-17))),
            (val(255u8), Value::Number(Number::Integer(255))),
            (val(i64::MIN), Value::Number(Number::Integer(i64::MIN))),
            (val(2.5), Value::Number(Number::Float(2.5))),
            (val(true), Value::Bool(true)),
            (sym("foo-bar?"), Value::Symbol("foo-bar?".to_owned())),
            (sym(String::from("set!")), Value::Symbol("set!".to_owned())),
            (nil(), Value::list(vec![])),
            (
                val([1, 2, 3]),
                Value::list(vec![val(1), val(2), val(3)]),
            ),
            (
                val(vec![sym("op"), val(42), val(true)]),
                Value::list(vec![
                    Value::Symbol("op".to_owned()),
                    Value::Number(Number::Integer(42)),
                    Value::Bool(true),
                ]),
            ),
        ];

        for (i, (actual, expected)) in test_cases.iter().enumerate() {
            assert_eq!(actual, expected, "Test case {} failed", i + 1);
        }
    }

    #[test]
    fn test_display_forms() {
        let cases = vec![
            (val(42), "42"),
            (val(-7), "-7"),
            (val(1.0), "1.0"),
            (val(0.5), "0.5"),
            (val(1e20), "1e20"),
            (val(f64::INFINITY), "inf"),
            (val(true), "#t"),
            (val(false), "#f"),
            (sym("lambda"), "lambda"),
            (nil(), "()"),
            (val([1, 2, 3]), "(1 2 3)"),
            (val(vec![sym("a"), val([val(1), nil()])]), "(a (1 ()))"),
            (Value::Unspecified, "#<unspecified>"),
        ];

        for (value, expected) in cases {
            assert_eq!(to_text(&value), expected);
        }
    }

    #[test]
    fn test_truthiness() {
        assert!(val(0).is_truthy());
        assert!(val(0.0).is_truthy());
        assert!(val(true).is_truthy());
        assert!(sym("x").is_truthy());
        assert!(val([1]).is_truthy());
        assert!(!val(false).is_truthy());
        assert!(!nil().is_truthy());
    }

    #[test]
    fn test_identity_differs_from_structure() {
        let a = val([1, 2]);
        let b = val([1, 2]);
        let a_again = a.clone();

        assert_eq!(a, b);
        assert!(!a.is_identical(&b));
        assert!(a.is_identical(&a_again));

        assert!(nil().is_identical(&nil()));
        assert!(val(3).is_identical(&val(3)));
        assert!(!val(3).is_identical(&val(3.0)));
        assert!(sym("x").is_identical(&sym("x")));
    }

    #[test]
    fn test_numbers_keep_exactness() {
        assert_ne!(val(1), val(1.0));
        assert_eq!(
            Number::Integer(1).numeric_cmp(Number::Float(1.0)),
            Some(Ordering::Equal)
        );
        assert_eq!(
            Number::Integer(2).checked_add(Number::Float(0.5)),
            Ok(Number::Float(2.5))
        );
        assert_eq!(
            Number::Integer(7).checked_div(Number::Integer(2)),
            Ok(Number::Float(3.5))
        );
        assert!(Number::Integer(i64::MAX).checked_add(Number::Integer(1)).is_err());
        assert!(Number::Integer(1).checked_div(Number::Integer(0)).is_err());
        assert!(Number::Float(f64::NAN).numeric_cmp(Number::Float(1.0)).is_none());
    }

    #[test]
    fn test_unspecified_values() {
        let unspec = Value::Unspecified;
        assert_ne!(unspec, unspec);
        assert_ne!(unspec, val(42));
        assert!(!unspec.is_identical(&Value::Unspecified));
    }
}
