//! Built-in operations registry.
//!
//! Every name the evaluator treats specially, and every primitive procedure
//! installed by [`create_global_env`](crate::evaluator::create_global_env),
//! is described once here as a `BuiltinOp`.
//!
//! ## Functions vs Special Forms
//!
//! - **Functions**: Evaluate all arguments before application (e.g., `+`, `not`, `car`)
//! - **Special Forms**: Control evaluation of arguments (e.g., `if`, `define`, `and`)
//!
//! Special forms are looked up by the evaluator through `find_special_form`
//! whenever a list starts with their keyword. They are never bound in an
//! environment. Functions are bound by name in the global environment and are
//! called like any other procedure, so user code can shadow or pass them around.
//!
//! ## Numbers
//!
//! Integer arithmetic stays exact and reports overflow as an error. Any float
//! operand promotes the result to float. `/` is true division and always
//! yields a float.
//!
//! ## Adding New Operations
//!
//! 1. **Implement the function** with typed parameters (`Number`, `Value`,
//!    `ValueIter<'_>`, `NumIter<'_>`) and a return type convertible to `Value`
//! 2. **Add to BUILTIN_OPS** with its identifier and arity
//! 3. **Add tests** to the table below

use crate::Error;
use crate::ast::{Number, Value, to_text};
use crate::environment::Environment;
use crate::evaluator::intooperation::{
    IntoOperation, IntoVariadicOperation, NumIter, OperationFn, ValueIter,
};
use crate::evaluator::{
    Depth, eval_and, eval_begin, eval_define, eval_if, eval_lambda, eval_or, eval_quote, eval_set,
};
use std::cmp::Ordering::{Equal, Greater, Less};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

/// Signature of a special-form handler: the unevaluated operands, the
/// environment of the form, and the current evaluation depth.
pub(crate) type SpecialFormFn = fn(&[Value], &Environment, Depth) -> Result<Value, Error>;

/// Accepted argument counts for a procedure or special form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly n arguments
    Exact(usize),
    /// At least n arguments
    AtLeast(usize),
    /// Between min and max arguments (inclusive)
    Range(usize, usize),
    /// Any number of arguments
    Any,
}

impl Arity {
    /// Check an argument count, reporting the nearest acceptable count on failure.
    pub fn validate(self, got: usize) -> Result<(), Error> {
        match self {
            Arity::Exact(n) if got != n => Err(Error::arity_error(n, got)),
            Arity::AtLeast(min) if got < min => Err(Error::arity_error(min, got)),
            Arity::Range(min, _) if got < min => Err(Error::arity_error(min, got)),
            Arity::Range(_, max) if got > max => Err(Error::arity_error(max, got)),
            _ => Ok(()),
        }
    }
}

/// Represents the implementation of a built-in expression (function or special form)
#[derive(Clone)]
pub(crate) enum OpKind {
    /// Regular function that takes evaluated arguments and returns a value
    /// via the canonical erased builtin signature used by the evaluator.
    Function(Arc<OperationFn>),
    /// Special form that receives its operands unevaluated
    SpecialForm(SpecialFormFn),
}

impl std::fmt::Debug for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::Function(_) => write!(f, "Function(<fn>)"),
            OpKind::SpecialForm(_) => write!(f, "SpecialForm(<fn>)"),
        }
    }
}

/// Definition of a built-in operation
#[derive(Debug, Clone)]
pub(crate) struct BuiltinOp {
    /// The identifier this operation is known by
    pub id: &'static str,
    /// The implementation of this operation (function or special form)
    pub op_kind: OpKind,
    /// Expected number of arguments
    pub arity: Arity,
}

impl PartialEq for BuiltinOp {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl BuiltinOp {
    /// Check if this operation is a special form
    #[cfg_attr(not(test), expect(dead_code))]
    pub(crate) fn is_special_form(&self) -> bool {
        matches!(self.op_kind, OpKind::SpecialForm(_))
    }

    /// Check if the given number of arguments is valid for this operation
    pub(crate) fn validate_arity(&self, arg_count: usize) -> Result<(), Error> {
        self.arity.validate(arg_count)
    }
}

//
// Builtin Function Implementations
//

// Macro to generate chained numeric comparison functions
macro_rules! numeric_comparison {
    ($name:ident, $($ord:pat_param)|+) => {
        fn $name(first: Number, rest: NumIter<'_>) -> bool {
            // All adjacent pairs must satisfy the comparison. NaN compares
            // false against everything.
            let mut prev = first;
            for current in rest {
                if !matches!(prev.numeric_cmp(current), Some($($ord)|+)) {
                    return false;
                }
                prev = current;
            }
            true
        }
    };
}

numeric_comparison!(builtin_num_eq, Equal);
numeric_comparison!(builtin_lt, Less);
numeric_comparison!(builtin_gt, Greater);
numeric_comparison!(builtin_le, Less | Equal);
numeric_comparison!(builtin_ge, Greater | Equal);

fn builtin_add(args: NumIter<'_>) -> Result<Number, Error> {
    let mut sum = Number::Integer(0);
    for arg in args {
        sum = sum.checked_add(arg)?;
    }
    Ok(sum)
}

fn builtin_mul(args: NumIter<'_>) -> Result<Number, Error> {
    let mut product = Number::Integer(1);
    for arg in args {
        product = product.checked_mul(arg)?;
    }
    Ok(product)
}

fn builtin_sub(first: Number, rest: NumIter<'_>) -> Result<Number, Error> {
    let mut iter = rest.peekable();

    if iter.peek().is_none() {
        return first.checked_neg();
    }

    let mut result = first;
    for n in iter {
        result = result.checked_sub(n)?;
    }
    Ok(result)
}

fn builtin_div(first: Number, rest: NumIter<'_>) -> Result<Number, Error> {
    let mut iter = rest.peekable();

    if iter.peek().is_none() {
        return Number::Integer(1).checked_div(first);
    }

    let mut result = first;
    for n in iter {
        result = result.checked_div(n)?;
    }
    Ok(result)
}

fn builtin_max(first: Number, rest: NumIter<'_>) -> Number {
    rest.fold(first, |best, n| match n.numeric_cmp(best) {
        Some(Greater) => n,
        _ => best,
    })
}

fn builtin_min(first: Number, rest: NumIter<'_>) -> Number {
    rest.fold(first, |best, n| match n.numeric_cmp(best) {
        Some(Less) => n,
        _ => best,
    })
}

fn builtin_abs(n: Number) -> Result<Number, Error> {
    n.checked_abs()
}

/// Run a float function and map NaN or infinity coming out of finite,
/// non-NaN input to the errors a math library would raise.
fn checked_float(name: &str, inputs: &[f64], result: f64) -> Result<f64, Error> {
    if inputs.iter().any(|x| x.is_nan()) {
        return Ok(result);
    }
    if result.is_nan() {
        return Err(Error::EvalError(format!("math domain error in {name}")));
    }
    if result.is_infinite() && inputs.iter().all(|x| x.is_finite()) {
        return Err(Error::EvalError(format!("math range error in {name}")));
    }
    Ok(result)
}

// Macro to generate one-argument float functions
macro_rules! float_unary {
    ($name:ident, $id:literal, $f:expr) => {
        fn $name(n: Number) -> Result<f64, Error> {
            let x = n.as_f64();
            let f: fn(f64) -> f64 = $f;
            checked_float($id, &[x], f(x))
        }
    };
}

float_unary!(builtin_sqrt, "sqrt", f64::sqrt);
float_unary!(builtin_exp, "exp", f64::exp);
float_unary!(builtin_sin, "sin", f64::sin);
float_unary!(builtin_cos, "cos", f64::cos);
float_unary!(builtin_tan, "tan", f64::tan);
float_unary!(builtin_asin, "asin", f64::asin);
float_unary!(builtin_acos, "acos", f64::acos);
float_unary!(builtin_atan, "atan", f64::atan);
float_unary!(builtin_floor, "floor", f64::floor);
float_unary!(builtin_ceil, "ceil", f64::ceil);
float_unary!(builtin_fabs, "fabs", f64::abs);
float_unary!(builtin_sinh, "sinh", f64::sinh);
float_unary!(builtin_cosh, "cosh", f64::cosh);
float_unary!(builtin_tanh, "tanh", f64::tanh);
float_unary!(builtin_degrees, "degrees", f64::to_degrees);
float_unary!(builtin_radians, "radians", f64::to_radians);

fn builtin_log10(x: Number) -> Result<f64, Error> {
    let x = x.as_f64();
    if x <= 0.0 {
        return Err(Error::EvalError("math domain error in log10".into()));
    }
    checked_float("log10", &[x], x.log10())
}

/// Truncate toward zero, yielding an integer
fn builtin_trunc(n: Number) -> Result<Number, Error> {
    match n {
        Number::Integer(_) => Ok(n),
        Number::Float(x) => {
            let t = x.trunc();
            // i64::MIN is exactly representable; i64::MAX + 1 is the first float past the range
            if t.is_finite() && t >= i64::MIN as f64 && t < -(i64::MIN as f64) {
                Ok(Number::Integer(t as i64))
            } else {
                Err(Error::EvalError(format!("cannot truncate {x} to an integer")))
            }
        }
    }
}

fn builtin_log(x: Number, base: NumIter<'_>) -> Result<f64, Error> {
    let x = x.as_f64();
    if x <= 0.0 {
        return Err(Error::EvalError("math domain error in log".into()));
    }
    let bases: Vec<Number> = base.collect();
    match bases.as_slice() {
        [] => checked_float("log", &[x], x.ln()),
        [b] => {
            let b = b.as_f64();
            if b <= 0.0 {
                return Err(Error::EvalError("math domain error in log".into()));
            }
            let denominator = b.ln();
            if denominator == 0.0 {
                return Err(Error::EvalError("Division by zero".into()));
            }
            checked_float("log", &[x, b], x.ln() / denominator)
        }
        _ => Err(Error::arity_error(2, bases.len() + 1)),
    }
}

fn builtin_pow(base: Number, exponent: Number) -> Result<f64, Error> {
    let (b, e) = (base.as_f64(), exponent.as_f64());
    if b == 0.0 && e < 0.0 {
        return Err(Error::EvalError("math domain error in pow".into()));
    }
    checked_float("pow", &[b, e], b.powf(e))
}

fn builtin_atan2(y: Number, x: Number) -> Result<f64, Error> {
    let (y, x) = (y.as_f64(), x.as_f64());
    checked_float("atan2", &[y, x], y.atan2(x))
}

fn builtin_hypot(x: Number, y: Number) -> Result<f64, Error> {
    let (x, y) = (x.as_f64(), y.as_f64());
    checked_float("hypot", &[x, y], x.hypot(y))
}

fn builtin_fmod(x: Number, y: Number) -> Result<f64, Error> {
    let (x, y) = (x.as_f64(), y.as_f64());
    checked_float("fmod", &[x, y], x % y)
}

fn builtin_not(value: Value) -> bool {
    !value.is_truthy()
}

fn builtin_eq(first: Value, second: Value) -> bool {
    first.is_identical(&second)
}

fn builtin_equal(first: Value, second: Value) -> bool {
    first == second
}

fn builtin_length(list: ValueIter<'_>) -> Result<i64, Error> {
    i64::try_from(list.len()).map_err(|_| Error::EvalError("list too long".into()))
}

fn builtin_car(mut list: ValueIter<'_>) -> Result<Value, Error> {
    match list.next() {
        Some(first) => Ok(first.clone()),
        None => Err(Error::TypeError("car of empty list".into())),
    }
}

fn builtin_cdr(mut list: ValueIter<'_>) -> Result<Value, Error> {
    let Some(_) = list.next() else {
        return Err(Error::TypeError("cdr of empty list".into()));
    };
    Ok(Value::list(list.as_slice().to_vec()))
}

fn builtin_cons(first: Value, rest: Value) -> Result<Value, Error> {
    match rest {
        Value::List(tail) => {
            let mut new_list = Vec::with_capacity(tail.len() + 1);
            new_list.push(first);
            new_list.extend_from_slice(&tail);
            Ok(Value::list(new_list))
        }
        // No pairs: the tail has to be a proper list already.
        other => Err(Error::TypeError(format!(
            "cons requires a list as second argument, got {other}"
        ))),
    }
}

fn builtin_append(lists: ValueIter<'_>) -> Result<Value, Error> {
    let mut result = Vec::new();
    for value in lists {
        match value {
            Value::List(items) => result.extend_from_slice(items),
            other => {
                return Err(Error::TypeError(format!(
                    "append requires list arguments, got {other}"
                )));
            }
        }
    }
    Ok(Value::list(result))
}

fn builtin_list(args: ValueIter<'_>) -> Value {
    Value::list(args.as_slice().to_vec())
}

fn builtin_is_list(value: Value) -> bool {
    value.is_list()
}

fn builtin_is_null(value: Value) -> bool {
    value.is_nil()
}

fn builtin_is_symbol(value: Value) -> bool {
    value.is_symbol()
}

fn builtin_is_number(value: Value) -> bool {
    value.is_number()
}

fn builtin_is_boolean(value: Value) -> bool {
    matches!(value, Value::Bool(_))
}

fn builtin_is_procedure(value: Value) -> bool {
    value.is_procedure()
}

fn builtin_print(value: Value) -> Value {
    println!("{}", to_text(&value));
    Value::Unspecified
}

/// Global registry of all built-in operations.
///
/// The registry is a single contiguous collection for ease of auditing. The
/// typed implementations above are wired through the same adapter layer used
/// for custom builtin registration, once, via a `LazyLock`.
static BUILTIN_OPS: LazyLock<Vec<BuiltinOp>> = LazyLock::new(|| {
    fn builtin_fixed<Args, F>(f: F) -> OpKind
    where
        F: IntoOperation<Args>,
    {
        OpKind::Function(<F as IntoOperation<Args>>::into_operation(f))
    }

    fn builtin_variadic<Args, F>(f: F) -> OpKind
    where
        F: IntoVariadicOperation<Args>,
    {
        OpKind::Function(<F as IntoVariadicOperation<Args>>::into_variadic_operation(f))
    }

    fn op(id: &'static str, arity: Arity, op_kind: OpKind) -> BuiltinOp {
        BuiltinOp { id, op_kind, arity }
    }

    type Rest = (NumIter<'static>,);
    type FirstAndRest = (Number, NumIter<'static>);
    type Unary = (Number,);
    type Predicate = (Value,);

    vec![
        // Special forms
        op("quote", Arity::Exact(1), OpKind::SpecialForm(eval_quote)),
        op("if", Arity::Exact(3), OpKind::SpecialForm(eval_if)),
        op("set!", Arity::Exact(2), OpKind::SpecialForm(eval_set)),
        op("define", Arity::Exact(2), OpKind::SpecialForm(eval_define)),
        // Fixed-arity lambdas only; no rest parameters
        op("lambda", Arity::Exact(2), OpKind::SpecialForm(eval_lambda)),
        op("begin", Arity::AtLeast(1), OpKind::SpecialForm(eval_begin)),
        op("and", Arity::Any, OpKind::SpecialForm(eval_and)),
        op("or", Arity::Any, OpKind::SpecialForm(eval_or)),
        // Arithmetic operations
        op("+", Arity::Any, builtin_variadic::<Rest, _>(builtin_add)),
        op("*", Arity::Any, builtin_variadic::<Rest, _>(builtin_mul)),
        op("-", Arity::AtLeast(1), builtin_variadic::<FirstAndRest, _>(builtin_sub)),
        op("/", Arity::AtLeast(1), builtin_variadic::<FirstAndRest, _>(builtin_div)),
        // Comparison operations
        op("=", Arity::AtLeast(2), builtin_variadic::<FirstAndRest, _>(builtin_num_eq)),
        op("<", Arity::AtLeast(2), builtin_variadic::<FirstAndRest, _>(builtin_lt)),
        op(">", Arity::AtLeast(2), builtin_variadic::<FirstAndRest, _>(builtin_gt)),
        op("<=", Arity::AtLeast(2), builtin_variadic::<FirstAndRest, _>(builtin_le)),
        op(">=", Arity::AtLeast(2), builtin_variadic::<FirstAndRest, _>(builtin_ge)),
        // Logic and equality
        op("not", Arity::Exact(1), builtin_fixed::<Predicate, _>(builtin_not)),
        op("eq?", Arity::Exact(2), builtin_fixed::<(Value, Value), _>(builtin_eq)),
        op("equal?", Arity::Exact(2), builtin_fixed::<(Value, Value), _>(builtin_equal)),
        // List operations
        op("length", Arity::Exact(1), builtin_fixed::<(ValueIter<'static>,), _>(builtin_length)),
        op("cons", Arity::Exact(2), builtin_fixed::<(Value, Value), _>(builtin_cons)),
        op("car", Arity::Exact(1), builtin_fixed::<(ValueIter<'static>,), _>(builtin_car)),
        op("cdr", Arity::Exact(1), builtin_fixed::<(ValueIter<'static>,), _>(builtin_cdr)),
        op("append", Arity::Any, builtin_variadic::<(ValueIter<'static>,), _>(builtin_append)),
        op("list", Arity::Any, builtin_variadic::<(ValueIter<'static>,), _>(builtin_list)),
        // Type predicates
        op("list?", Arity::Exact(1), builtin_fixed::<Predicate, _>(builtin_is_list)),
        op("null?", Arity::Exact(1), builtin_fixed::<Predicate, _>(builtin_is_null)),
        op("symbol?", Arity::Exact(1), builtin_fixed::<Predicate, _>(builtin_is_symbol)),
        op("number?", Arity::Exact(1), builtin_fixed::<Predicate, _>(builtin_is_number)),
        op("boolean?", Arity::Exact(1), builtin_fixed::<Predicate, _>(builtin_is_boolean)),
        op("procedure?", Arity::Exact(1), builtin_fixed::<Predicate, _>(builtin_is_procedure)),
        // Math operations
        op("max", Arity::AtLeast(1), builtin_variadic::<FirstAndRest, _>(builtin_max)),
        op("min", Arity::AtLeast(1), builtin_variadic::<FirstAndRest, _>(builtin_min)),
        op("abs", Arity::Exact(1), builtin_fixed::<Unary, _>(builtin_abs)),
        op("sqrt", Arity::Exact(1), builtin_fixed::<Unary, _>(builtin_sqrt)),
        op("exp", Arity::Exact(1), builtin_fixed::<Unary, _>(builtin_exp)),
        op("sin", Arity::Exact(1), builtin_fixed::<Unary, _>(builtin_sin)),
        op("cos", Arity::Exact(1), builtin_fixed::<Unary, _>(builtin_cos)),
        op("tan", Arity::Exact(1), builtin_fixed::<Unary, _>(builtin_tan)),
        op("asin", Arity::Exact(1), builtin_fixed::<Unary, _>(builtin_asin)),
        op("acos", Arity::Exact(1), builtin_fixed::<Unary, _>(builtin_acos)),
        op("atan", Arity::Exact(1), builtin_fixed::<Unary, _>(builtin_atan)),
        op("floor", Arity::Exact(1), builtin_fixed::<Unary, _>(builtin_floor)),
        op("ceil", Arity::Exact(1), builtin_fixed::<Unary, _>(builtin_ceil)),
        op("fabs", Arity::Exact(1), builtin_fixed::<Unary, _>(builtin_fabs)),
        op("sinh", Arity::Exact(1), builtin_fixed::<Unary, _>(builtin_sinh)),
        op("cosh", Arity::Exact(1), builtin_fixed::<Unary, _>(builtin_cosh)),
        op("tanh", Arity::Exact(1), builtin_fixed::<Unary, _>(builtin_tanh)),
        op("degrees", Arity::Exact(1), builtin_fixed::<Unary, _>(builtin_degrees)),
        op("radians", Arity::Exact(1), builtin_fixed::<Unary, _>(builtin_radians)),
        op("log10", Arity::Exact(1), builtin_fixed::<Unary, _>(builtin_log10)),
        op("trunc", Arity::Exact(1), builtin_fixed::<Unary, _>(builtin_trunc)),
        op("log", Arity::Range(1, 2), builtin_variadic::<FirstAndRest, _>(builtin_log)),
        op("pow", Arity::Exact(2), builtin_fixed::<(Number, Number), _>(builtin_pow)),
        op("atan2", Arity::Exact(2), builtin_fixed::<(Number, Number), _>(builtin_atan2)),
        op("hypot", Arity::Exact(2), builtin_fixed::<(Number, Number), _>(builtin_hypot)),
        op("fmod", Arity::Exact(2), builtin_fixed::<(Number, Number), _>(builtin_fmod)),
        // Output
        op("print", Arity::Exact(1), builtin_fixed::<Predicate, _>(builtin_print)),
    ]
});

/// Lazy static map from id to BuiltinOp (private - use find_builtin_op)
static BUILTIN_BY_ID: LazyLock<HashMap<&'static str, &'static BuiltinOp>> = LazyLock::new(|| {
    let ops: &'static [BuiltinOp] = BUILTIN_OPS.as_slice();
    ops.iter().map(|op| (op.id, op)).collect()
});

/// Get all builtin operations (for internal use by evaluator)
pub(crate) fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS.as_slice()
}

/// Find a builtin operation by its identifier
pub(crate) fn find_builtin_op(id: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_BY_ID.get(id).copied()
}

/// Find a special form by its keyword. Primitive functions are not returned;
/// they are resolved through the environment like any other procedure.
pub(crate) fn find_special_form(id: &str) -> Option<(Arity, SpecialFormFn)> {
    let op = find_builtin_op(id)?;
    match op.op_kind {
        OpKind::SpecialForm(handler) => Some((op.arity, handler)),
        OpKind::Function(_) => None,
    }
}

/// Global constants installed next to the primitive functions.
pub(crate) fn builtin_constants() -> [(&'static str, Value); 3] {
    [
        ("null", Value::list(Vec::new())),
        ("pi", Value::from(std::f64::consts::PI)),
        ("e", Value::from(std::f64::consts::E)),
    ]
}
