use crate::Error;
use crate::ast::{Number, Value};
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::sync::Arc;

// NOTE: This module is internal plumbing for the evaluator.
// It defines the adapter layer that turns strongly-typed Rust
// functions into the erased `OperationFn` stored in
// `Value::BuiltinFunction`. External users go through the
// registration methods on `Environment`.

/// Canonical erased builtin function type used by the evaluator.
///
/// Builtins receive ownership of their argument vector, enabling
/// implementations that consume or rearrange arguments if desired.
pub type OperationFn = dyn Fn(Vec<Value>) -> Result<Value, Error> + Send + Sync;

// =====================================================================
// Single-argument conversion
// =====================================================================

/// Turns one evaluated argument into a strongly-typed parameter.
///
/// `Param<'a>` is the type seen by the builtin; it may borrow from the
/// argument slot (the list iterators) or take it by value.
pub trait FromParam {
    type Param<'a>;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error>;
}

impl FromParam for Value {
    type Param<'a> = Value;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        // Move out rather than clone; the argument vector is owned.
        Ok(std::mem::replace(value, Value::Unspecified))
    }
}

impl FromParam for Number {
    type Param<'a> = Number;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        match value {
            Value::Number(n) => Ok(*n),
            other => Err(Error::TypeError(format!("expected number, got {other}"))),
        }
    }
}

impl<'b, K> FromParam for TypedValueIter<'b, K>
where
    K: ValueElementKind,
{
    type Param<'a> = TypedValueIter<'a, K>;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        match value {
            Value::List(items) => TypedValueIter::<K>::new(&items[..]),
            other => Err(Error::TypeError(format!("expected list, got {other}"))),
        }
    }
}

// =====================================================================
// Typed iteration over argument slices and list contents
// =====================================================================

/// Describes how to view a `Value` slice as a typed iterator.
/// `precheck` validates the whole slice up front so `project`
/// cannot fail.
#[doc(hidden)]
pub trait ValueElementKind {
    type Item<'a>;

    fn precheck(slice: &[Value]) -> Result<(), Error>;
    fn project<'a>(v: &'a Value) -> Self::Item<'a>;
}

#[doc(hidden)]
pub struct TypedValueIter<'a, K: ValueElementKind> {
    inner: std::slice::Iter<'a, Value>,
    _marker: PhantomData<K>,
}

impl<'a, K> TypedValueIter<'a, K>
where
    K: ValueElementKind,
{
    pub(crate) fn new(values: &'a [Value]) -> Result<Self, Error> {
        K::precheck(values)?;
        Ok(TypedValueIter {
            inner: values.iter(),
            _marker: PhantomData,
        })
    }

    /// The remaining elements as a slice.
    pub fn as_slice(&self) -> &'a [Value] {
        self.inner.as_slice()
    }
}

impl<'a, K> Iterator for TypedValueIter<'a, K>
where
    K: ValueElementKind,
{
    type Item = K::Item<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(K::project)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K> ExactSizeIterator for TypedValueIter<'_, K> where K: ValueElementKind {}
impl<K> FusedIterator for TypedValueIter<'_, K> where K: ValueElementKind {}

#[doc(hidden)]
pub struct ValueKind;

impl ValueElementKind for ValueKind {
    type Item<'a> = &'a Value;

    fn precheck(_slice: &[Value]) -> Result<(), Error> {
        Ok(())
    }

    fn project<'a>(v: &'a Value) -> Self::Item<'a> {
        v
    }
}

#[doc(hidden)]
pub struct NumberKind;

impl ValueElementKind for NumberKind {
    type Item<'a> = Number;

    fn precheck(slice: &[Value]) -> Result<(), Error> {
        match slice.iter().find(|v| !v.is_number()) {
            Some(bad) => Err(Error::TypeError(format!("expected number, got {bad}"))),
            None => Ok(()),
        }
    }

    fn project<'a>(v: &'a Value) -> Self::Item<'a> {
        match v {
            Value::Number(n) => *n,
            _ => unreachable!("NumberKind invariant violated"),
        }
    }
}

/// Borrowed iterator over values, either the elements of a list
/// argument or the trailing arguments of a variadic call.
pub type ValueIter<'a> = TypedValueIter<'a, ValueKind>;

/// Borrowed iterator over numbers; every element was type checked
/// before the builtin runs.
pub type NumIter<'a> = TypedValueIter<'a, NumberKind>;

// =====================================================================
// Rest parameters
// =====================================================================

/// Builds a rest-parameter value from the tail of the argument vector.
pub trait FromRest {
    type Param<'a>;

    fn from_rest<'a>(slice: &'a [Value]) -> Result<Self::Param<'a>, Error>;
}

impl<K> FromRest for TypedValueIter<'static, K>
where
    K: ValueElementKind,
{
    type Param<'a> = TypedValueIter<'a, K>;

    fn from_rest<'a>(slice: &'a [Value]) -> Result<Self::Param<'a>, Error> {
        TypedValueIter::<K>::new(slice)
    }
}

// =====================================================================
// Return-type adaptation
// =====================================================================

/// Normalizes builtin return types to `Result<Value, Error>`.
pub trait IntoValueResult {
    fn into_value_result(self) -> Result<Value, Error>;
}

impl<T> IntoValueResult for Result<T, Error>
where
    T: Into<Value>,
{
    fn into_value_result(self) -> Result<Value, Error> {
        self.map(Into::into)
    }
}

impl<T> IntoValueResult for T
where
    T: Into<Value>,
{
    fn into_value_result(self) -> Result<Value, Error> {
        Ok(self.into())
    }
}

/// Converts a typed fixed-arity Rust function into an [`OperationFn`].
/// `Args` is the tuple of parameter types.
pub trait IntoOperation<Args> {
    fn into_operation(self) -> Arc<OperationFn>;
}

/// Converts a typed Rust function whose last parameter is a rest
/// iterator (`ValueIter` / `NumIter`) into an [`OperationFn`].
pub trait IntoVariadicOperation<Args> {
    fn into_variadic_operation(self) -> Arc<OperationFn>;
}

/// Rest parameter only: `fn(NumIter<'_>) -> R`.
impl<F, I, R> IntoVariadicOperation<(I,)> for F
where
    I: FromRest,
    F: for<'a> Fn(<I as FromRest>::Param<'a>) -> R + Send + Sync + 'static,
    R: IntoValueResult,
{
    fn into_variadic_operation(self) -> Arc<OperationFn> {
        Arc::new(move |args: Vec<Value>| {
            let rest = <I as FromRest>::from_rest(&args[..])?;
            (self)(rest).into_value_result()
        })
    }
}

/// One fixed parameter then a rest parameter: `fn(Number, NumIter<'_>) -> R`.
impl<F, A, I, R> IntoVariadicOperation<(A, I)> for F
where
    A: FromParam,
    I: FromRest,
    F: for<'a> Fn(<A as FromParam>::Param<'a>, <I as FromRest>::Param<'a>) -> R
        + Send
        + Sync
        + 'static,
    R: IntoValueResult,
{
    fn into_variadic_operation(self) -> Arc<OperationFn> {
        Arc::new(move |mut args: Vec<Value>| {
            let len = args.len();
            match args.as_mut_slice() {
                [first, rest @ ..] => {
                    let first = <A as FromParam>::from_arg(first)?;
                    let rest = <I as FromRest>::from_rest(&*rest)?;
                    (self)(first, rest).into_value_result()
                }
                [] => Err(Error::arity_error(1, len)),
            }
        })
    }
}

// =====================================================================
// Fixed-arity adapters
// =====================================================================

/// Implements `IntoOperation` for one arity: checks the argument
/// count, converts each slot through `FromParam`, then calls.
macro_rules! impl_into_operation_for_arity {
    ($arity:expr, $( $v:ident, $p:ident : $A:ident ),+ ) => {
        impl<F, R, $( $A ),+> IntoOperation<( $( $A, )+ )> for F
        where
            F: for<'a> Fn( $( <$A as FromParam>::Param<'a> ),+ ) -> R
                + Send
                + Sync
                + 'static,
            $( $A: FromParam, )+
            R: IntoValueResult,
        {
            fn into_operation(self) -> Arc<OperationFn> {
                Arc::new(move |mut args: Vec<Value>| {
                    let len = args.len();
                    match args.as_mut_slice() {
                        [ $( $v ),+ ] => {
                            $(
                                let $p = <$A as FromParam>::from_arg($v)?;
                            )+
                            (self)( $( $p ),+ ).into_value_result()
                        }
                        _ => Err(Error::arity_error($arity, len)),
                    }
                })
            }
        }
    };
}

impl<F, R> IntoOperation<()> for F
where
    F: Fn() -> R + Send + Sync + 'static,
    R: IntoValueResult,
{
    fn into_operation(self) -> Arc<OperationFn> {
        Arc::new(move |args: Vec<Value>| {
            if !args.is_empty() {
                return Err(Error::arity_error(0, args.len()));
            }
            (self)().into_value_result()
        })
    }
}

impl_into_operation_for_arity!(1, v0, p0: A1);
impl_into_operation_for_arity!(2, v0, p0: A1, v1, p1: A2);
impl_into_operation_for_arity!(3, v0, p0: A1, v1, p1: A2, v2, p2: A3);
