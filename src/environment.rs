//! Lexical environments.
//!
//! An [`Environment`] is a cheap, clonable handle to one scope: a binding
//! table plus an optional parent. Handles share the scope, so a closure that
//! captures its defining environment observes later `define`/`set!` there.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::Error;
use crate::ast::Value;
use crate::builtinops::Arity;
use crate::evaluator::intooperation::{IntoOperation, IntoVariadicOperation, OperationFn};

struct Scope {
    bindings: HashMap<String, Value>,
    parent: Option<Environment>,
}

/// Environment for variable bindings
#[derive(Clone)]
pub struct Environment(Rc<RefCell<Scope>>);

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Environment {
    // Bindings may hold closures that capture this environment, so only names
    // are printed.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = self.0.borrow();
        let mut names: Vec<&String> = scope.bindings.keys().collect();
        names.sort();
        f.debug_struct("Environment")
            .field("bindings", &names)
            .field("has_parent", &scope.parent.is_some())
            .finish()
    }
}

impl Environment {
    /// Create an empty root environment with no parent.
    pub fn new() -> Self {
        Environment(Rc::new(RefCell::new(Scope {
            bindings: HashMap::new(),
            parent: None,
        })))
    }

    /// Create an empty scope whose lookups fall back to `parent`.
    pub fn with_parent(parent: &Environment) -> Self {
        Environment(Rc::new(RefCell::new(Scope {
            bindings: HashMap::new(),
            parent: Some(parent.clone()),
        })))
    }

    pub fn parent(&self) -> Option<Environment> {
        self.0.borrow().parent.clone()
    }

    /// Whether two handles refer to the same scope.
    pub fn ptr_eq(&self, other: &Environment) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Bind `name` in this scope only, replacing any existing local binding.
    /// Ancestors are never consulted.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.0.borrow_mut().bindings.insert(name.into(), value);
    }

    /// Whether `name` is bound in this scope (ignoring ancestors).
    pub fn contains_local(&self, name: &str) -> bool {
        self.0.borrow().bindings.contains_key(name)
    }

    /// Resolve `name` through this scope and its ancestors.
    pub fn get(&self, name: &str) -> Option<Value> {
        let mut scope = self.clone();
        loop {
            let parent = {
                let inner = scope.0.borrow();
                if let Some(value) = inner.bindings.get(name) {
                    return Some(value.clone());
                }
                inner.parent.clone()
            };
            scope = parent?;
        }
    }

    /// Like [`Environment::get`] but unbound names are an error.
    pub fn lookup(&self, name: &str) -> Result<Value, Error> {
        self.get(name)
            .ok_or_else(|| Error::UnboundVariable(name.to_owned()))
    }

    /// Overwrite an existing binding in the innermost scope that has `name`.
    ///
    /// Unlike [`Environment::define`] this walks outward and never creates a
    /// binding: an unbound name is an error.
    pub fn assign(&self, name: &str, value: Value) -> Result<(), Error> {
        let mut scope = self.clone();
        loop {
            let parent = {
                let mut inner = scope.0.borrow_mut();
                if let Some(slot) = inner.bindings.get_mut(name) {
                    *slot = value;
                    return Ok(());
                }
                inner.parent.clone()
            };
            match parent {
                Some(parent) => scope = parent,
                None => return Err(Error::UnboundVariable(name.to_owned())),
            }
        }
    }

    /// Register a custom builtin function working on raw argument slices.
    ///
    /// This is the low-level API. The typed
    /// [`Environment::register_builtin_operation`] is usually more convenient.
    ///
    /// # Example
    /// ```
    /// use sexpeval::{Environment, Value, Error, eval, read};
    ///
    /// fn count_args(args: &[Value]) -> Result<Value, Error> {
    ///     Ok(Value::from(args.len() as i64))
    /// }
    ///
    /// let env = Environment::new();
    /// env.register_builtin_function("count-args", count_args);
    /// let expr = read("(count-args 1 2 3)").unwrap();
    /// assert_eq!(eval(&expr, &env).unwrap(), Value::from(3));
    /// ```
    pub fn register_builtin_function(
        &self,
        name: &str,
        func: fn(&[Value]) -> Result<Value, Error>,
    ) {
        let wrapped: Arc<OperationFn> = Arc::new(move |args: Vec<Value>| func(&args));
        self.define(
            name,
            Value::BuiltinFunction {
                id: name.to_owned(),
                func: wrapped,
            },
        );
    }

    /// Register a strongly-typed Rust function as a builtin with automatic
    /// argument conversion and arity checking.
    ///
    /// Supported parameter types are `Number`, `Value` and the list iterators
    /// `ValueIter<'_>` / `NumIter<'_>` (a single list argument). Supported
    /// return types are anything `Into<Value>` or `Result<R, Error>` of such.
    ///
    /// ```rust,ignore
    /// fn hypot(a: Number, b: Number) -> f64 { a.as_f64().hypot(b.as_f64()) }
    /// env.register_builtin_operation::<_, (Number, Number)>("hypot", hypot);
    /// ```
    pub fn register_builtin_operation<F, Args>(&self, name: &str, func: F)
    where
        F: IntoOperation<Args> + 'static,
    {
        self.define(
            name,
            Value::BuiltinFunction {
                id: name.to_owned(),
                func: func.into_operation(),
            },
        );
    }

    /// Register a builtin whose Rust signature ends in a rest parameter
    /// (`ValueIter<'_>` or `NumIter<'_>` spanning the remaining arguments).
    ///
    /// The provided [`Arity`] is checked before the function runs, since the
    /// acceptable argument count is not derivable from the signature alone.
    pub fn register_variadic_builtin_operation<F, Args>(&self, name: &str, arity: Arity, func: F)
    where
        F: IntoVariadicOperation<Args> + 'static,
    {
        let inner = func.into_variadic_operation();
        let wrapped: Arc<OperationFn> = Arc::new(move |args: Vec<Value>| {
            arity.validate(args.len())?;
            inner(args)
        });
        self.define(
            name,
            Value::BuiltinFunction {
                id: name.to_owned(),
                func: wrapped,
            },
        );
    }

    /// All visible bindings as (name, value) pairs sorted by name; inner
    /// bindings shadow outer ones.
    pub fn get_all_bindings(&self) -> Vec<(String, Value)> {
        let mut bindings = HashMap::new();

        let scope = self.0.borrow();
        if let Some(parent) = &scope.parent {
            bindings.extend(parent.get_all_bindings());
        }
        for (name, value) in &scope.bindings {
            bindings.insert(name.clone(), value.clone());
        }

        let mut result: Vec<_> = bindings.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}
