use crate::ast::{Lambda, Value, to_text};
use crate::builtinops::{OpKind, builtin_constants, find_special_form, get_builtin_ops};
use crate::environment::Environment;
use crate::{Error, MAX_EVAL_DEPTH};
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, trace};

pub mod intooperation;

pub use crate::builtinops::Arity;
pub use intooperation::{NumIter, ValueIter};

/// Configuration for evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalConfig {
    /// Maximum evaluation depth; each nested sub-evaluation counts one level
    pub max_depth: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        EvalConfig {
            max_depth: MAX_EVAL_DEPTH,
        }
    }
}

/// Current evaluation depth together with the configured limit
#[derive(Debug, Clone, Copy)]
pub(crate) struct Depth {
    level: usize,
    limit: usize,
}

impl Depth {
    fn root(config: &EvalConfig) -> Self {
        Depth {
            level: 0,
            limit: config.max_depth,
        }
    }

    pub(crate) fn next(self) -> Self {
        Depth {
            level: self.level + 1,
            ..self
        }
    }

    fn exceeded(self) -> bool {
        self.level >= self.limit
    }
}

/// Evaluate an S-expression (public API)
pub fn eval(expr: &Value, env: &Environment) -> Result<Value, Error> {
    eval_with_config(expr, env, &EvalConfig::default())
}

/// Evaluate an S-expression with an explicit depth limit
pub fn eval_with_config(
    expr: &Value,
    env: &Environment,
    config: &EvalConfig,
) -> Result<Value, Error> {
    eval_with_depth_tracking(expr, env, Depth::root(config))
}

/// Evaluate an S-expression with depth tracking to prevent stack overflow
fn eval_with_depth_tracking(expr: &Value, env: &Environment, depth: Depth) -> Result<Value, Error> {
    if depth.exceeded() {
        return Err(Error::EvalError(format!(
            "Evaluation depth limit exceeded (max: {})",
            depth.limit
        )));
    }
    trace!(depth = depth.level, expr = %expr, "eval");

    match expr {
        // Variable lookup
        Value::Symbol(name) => env.lookup(name),

        // Special forms and procedure application
        Value::List(elements) => {
            eval_list(expr, elements, env, depth).map_err(|err| add_context(err, expr))
        }

        // Everything else is self-evaluating
        Value::Number(_)
        | Value::Bool(_)
        | Value::BuiltinFunction { .. }
        | Value::Function(_)
        | Value::Unspecified => Ok(expr.clone()),
    }
}

const CONTEXT_MARKER: &str = "\n  Context: while evaluating: ";

/// Attach the failing expression to the error message. Only the innermost
/// compound expression is recorded; outer frames pass the error through.
fn add_context(error: Error, expr: &Value) -> Error {
    match error {
        Error::EvalError(msg) if !msg.contains(CONTEXT_MARKER) => {
            Error::EvalError(format!("{msg}{CONTEXT_MARKER}{expr}"))
        }
        Error::TypeError(msg) if !msg.contains(CONTEXT_MARKER) => {
            Error::TypeError(format!("{msg}{CONTEXT_MARKER}{expr}"))
        }
        // Syntax, unbound variable and arity errors carry their own context
        other => other,
    }
}

/// Helper function to evaluate a list of argument expressions with depth tracking
fn eval_args(args: &[Value], env: &Environment, depth: Depth) -> Result<Vec<Value>, Error> {
    args.iter()
        .map(|arg| eval_with_depth_tracking(arg, env, depth.next()))
        .collect()
}

/// Evaluate a non-atomic expression: a special form when the head is one of
/// the reserved keywords, otherwise a procedure call.
fn eval_list(
    expr: &Value,
    elements: &[Value],
    env: &Environment,
    depth: Depth,
) -> Result<Value, Error> {
    match elements {
        [] => Err(Error::TypeError(
            "Cannot evaluate empty list: nothing to apply".to_owned(),
        )),

        [head, operands @ ..] => {
            if let Value::Symbol(keyword) = head
                && let Some((arity, handler)) = find_special_form(keyword)
            {
                arity.validate(operands.len()).map_err(|err| match err {
                    Error::ArityError { expected, got, .. } => {
                        Error::arity_error_with_expr(expected, got, to_text(expr))
                    }
                    other => other,
                })?;
                return handler(operands, env, depth);
            }

            let func = eval_with_depth_tracking(head, env, depth.next())?;
            let args = eval_args(operands, env, depth)?;
            apply_with_depth(&func, args, depth)
        }
    }
}

/// Apply a procedure to already-evaluated arguments.
///
/// Primitives receive the argument vector as-is. A closure binds its
/// parameters positionally in a fresh child of the environment it captured
/// and evaluates its body there.
pub fn apply(procedure: &Value, args: Vec<Value>) -> Result<Value, Error> {
    apply_with_depth(procedure, args, Depth::root(&EvalConfig::default()))
}

fn apply_with_depth(procedure: &Value, args: Vec<Value>, depth: Depth) -> Result<Value, Error> {
    match procedure {
        Value::BuiltinFunction { func, .. } => func(args),
        Value::Function(lambda) => {
            if lambda.params.len() != args.len() {
                return Err(Error::arity_error(lambda.params.len(), args.len()));
            }
            trace!(depth = depth.level, params = ?lambda.params, "apply closure");

            let frame = Environment::with_parent(&lambda.env);
            for (param, arg) in lambda.params.iter().zip(args) {
                frame.define(param.clone(), arg);
            }
            eval_with_depth_tracking(&lambda.body, &frame, depth.next())
        }
        other => Err(Error::TypeError(format!(
            "Cannot apply non-function: {other}"
        ))),
    }
}

/// Evaluate quote special form
pub(crate) fn eval_quote(
    args: &[Value],
    _env: &Environment,
    _depth: Depth,
) -> Result<Value, Error> {
    match args {
        [expr] => Ok(expr.clone()),
        _ => Err(Error::arity_error(1, args.len())),
    }
}

/// Evaluate if special form
pub(crate) fn eval_if(args: &[Value], env: &Environment, depth: Depth) -> Result<Value, Error> {
    match args {
        [test, consequent, alternative] => {
            let branch = if eval_with_depth_tracking(test, env, depth.next())?.is_truthy() {
                consequent
            } else {
                alternative
            };
            eval_with_depth_tracking(branch, env, depth.next())
        }
        _ => Err(Error::arity_error(3, args.len())),
    }
}

/// Evaluate set! special form
pub(crate) fn eval_set(args: &[Value], env: &Environment, depth: Depth) -> Result<Value, Error> {
    match args {
        [Value::Symbol(name), expr] => {
            let value = eval_with_depth_tracking(expr, env, depth.next())?;
            env.assign(name, value)?;
            Ok(Value::Unspecified)
        }
        [_, _] => Err(Error::TypeError("set! requires a symbol".to_owned())),
        _ => Err(Error::arity_error(2, args.len())),
    }
}

/// Evaluate define special form
pub(crate) fn eval_define(args: &[Value], env: &Environment, depth: Depth) -> Result<Value, Error> {
    match args {
        [Value::Symbol(name), expr] => {
            let value = eval_with_depth_tracking(expr, env, depth.next())?;
            env.define(name.clone(), value);
            Ok(Value::Unspecified)
        }
        [_, _] => Err(Error::TypeError("define requires a symbol".to_owned())),
        _ => Err(Error::arity_error(2, args.len())),
    }
}

/// Evaluate lambda special form
pub(crate) fn eval_lambda(
    args: &[Value],
    env: &Environment,
    _depth: Depth,
) -> Result<Value, Error> {
    match args {
        [Value::List(param_list), body] => {
            let mut params: Vec<String> = Vec::with_capacity(param_list.len());
            for param in param_list.iter() {
                match param {
                    Value::Symbol(name) => {
                        if params.contains(name) {
                            return Err(Error::EvalError(format!(
                                "Duplicate parameter name: {name}"
                            )));
                        }
                        params.push(name.clone());
                    }
                    _ => {
                        return Err(Error::TypeError(
                            "Lambda parameters must be symbols".to_owned(),
                        ));
                    }
                }
            }

            // Only fixed-arity parameter lists: no `(lambda args body)` and
            // no dotted rest parameter.
            Ok(Value::Function(Rc::new(Lambda {
                params,
                body: body.clone(),
                env: env.clone(),
            })))
        }
        [_, _] => Err(Error::TypeError(
            "Lambda parameters must be a list".to_owned(),
        )),
        _ => Err(Error::arity_error(2, args.len())),
    }
}

/// Evaluate begin special form
pub(crate) fn eval_begin(args: &[Value], env: &Environment, depth: Depth) -> Result<Value, Error> {
    let Some((last, init)) = args.split_last() else {
        return Err(Error::arity_error(1, 0));
    };
    for expr in init {
        eval_with_depth_tracking(expr, env, depth.next())?;
    }
    eval_with_depth_tracking(last, env, depth.next())
}

macro_rules! short_circuit_op {
    ($name:ident, $stop_when_truthy:literal, $default:literal) => {
        /// Evaluates operands left to right and stops at the first one whose
        /// truthiness decides the result, returning that value itself.
        pub(crate) fn $name(
            args: &[Value],
            env: &Environment,
            depth: Depth,
        ) -> Result<Value, Error> {
            let mut result = Value::Bool($default);
            for arg in args {
                result = eval_with_depth_tracking(arg, env, depth.next())?;
                if result.is_truthy() == $stop_when_truthy {
                    return Ok(result);
                }
            }
            Ok(result)
        }
    };
}

short_circuit_op!(eval_and, false, true);
short_circuit_op!(eval_or, true, false);

/// Create an empty root environment (no primitives installed)
pub fn make_root_environment() -> Environment {
    Environment::new()
}

/// Create a global environment with built-in functions and constants
pub fn create_global_env() -> Environment {
    let env = make_root_environment();

    for builtin_op in get_builtin_ops() {
        if let OpKind::Function(func) = &builtin_op.op_kind {
            let func = Arc::clone(func);
            env.define(
                builtin_op.id,
                Value::BuiltinFunction {
                    id: builtin_op.id.to_owned(),
                    func: Arc::new(move |args: Vec<Value>| {
                        builtin_op.validate_arity(args.len())?;
                        func(args)
                    }),
                },
            );
        }
    }

    for (name, value) in builtin_constants() {
        env.define(name, value);
    }

    debug!(
        bindings = env.get_all_bindings().len(),
        "installed global environment"
    );
    env
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{Number, nil, sym, val};
    use crate::reader::read;

    #[derive(Debug)]
    enum TestResult {
        EvalResult(Value),
        SpecificError(&'static str),
        AnyError,
    }
    use TestResult::*;

    /// Test environment containing test cases that share state
    struct TestEnvironment(Vec<(&'static str, TestResult)>);

    /// Micro-helper for success cases in comprehensive tests
    fn success<T: Into<Value>>(value: T) -> TestResult {
        EvalResult(val(value))
    }

    /// Macro for setup expressions that return Unspecified (like define)
    macro_rules! test_setup {
        ($expr:expr) => {
            ($expr, EvalResult(Value::Unspecified))
        };
    }

    /// Run tests in isolated environments with shared state
    fn run_tests_in_environment(test_environments: Vec<TestEnvironment>) {
        for (env_idx, TestEnvironment(test_cases)) in test_environments.iter().enumerate() {
            let env = create_global_env();
            for (test_idx, (input, expected)) in test_cases.iter().enumerate() {
                let test_id = format!("Environment #{} test #{}", env_idx + 1, test_idx + 1);
                execute_test_case(input, expected, &env, &test_id);
            }
        }
    }

    /// Execute a single test case with detailed error reporting
    fn execute_test_case(input: &str, expected: &TestResult, env: &Environment, test_id: &str) {
        let expr = match read(input) {
            Ok(expr) => expr,
            Err(parse_err) => {
                panic!("{test_id}: unexpected parse error for '{input}': {parse_err:?}");
            }
        };

        match (eval(&expr, env), expected) {
            (Ok(actual), EvalResult(expected_val)) => match (&actual, expected_val) {
                // Unspecified never compares equal, so match on the variant
                (Value::Unspecified, Value::Unspecified) => {}
                _ => {
                    assert_eq!(
                        actual, *expected_val,
                        "{test_id}: wrong result for '{input}'"
                    );
                }
            },
            (Err(_), AnyError) => {}
            (Err(e), SpecificError(expected_text)) => {
                let error_msg = format!("{e}");
                assert!(
                    error_msg.contains(expected_text),
                    "{test_id}: error should contain '{expected_text}', got: {error_msg}"
                );
            }
            (Ok(actual), AnyError) => {
                panic!("{test_id}: expected error for '{input}', got {actual:?}");
            }
            (Ok(actual), SpecificError(expected_text)) => {
                panic!("{test_id}: expected error containing '{expected_text}', got {actual:?}");
            }
            (Err(err), EvalResult(expected_val)) => {
                panic!("{test_id}: expected {expected_val:?} for '{input}', got error {err:?}");
            }
        }
    }

    /// Each case runs in a fresh global environment
    fn run_comprehensive_tests(test_cases: Vec<(&str, TestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let env = create_global_env();
            let test_id = format!("#{}", i + 1);
            execute_test_case(input, expected, &env, &test_id);
        }
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_comprehensive_operations_data_driven() {
        let test_cases = vec![
            // === SELF-EVALUATING FORMS ===
            ("42", success(42)),
            ("-271", success(-271)),
            ("2.5", success(2.5)),
            ("#t", success(true)),
            ("#f", success(false)),
            // === CONSTANTS ===
            ("null", EvalResult(nil())),
            ("(null? null)", success(true)),
            ("pi", success(std::f64::consts::PI)),
            ("e", success(std::f64::consts::E)),
            // === QUOTE ===
            ("(quote (1 2 3))", success([1, 2, 3])),
            ("(quote foo)", EvalResult(sym("foo"))),
            ("(quote ())", EvalResult(nil())),
            ("(quote (a (b c)))", EvalResult(val(vec![sym("a"), val(vec![sym("b"), sym("c")])]))),
            ("(quote)", SpecificError("ArityError")),
            ("(quote 1 2)", SpecificError("expression (quote 1 2): expected 1 arguments, got 2")),
            // === IF ===
            ("(if (> 2 1) 10 20)", success(10)),
            ("(if (> 1 2) 10 20)", success(20)),
            ("(if 0 (quote yes) (quote no))", EvalResult(sym("yes"))),
            ("(if (quote ()) 1 2)", success(2)),
            ("(if null 1 2)", success(2)),
            ("(if #f 1 2)", success(2)),
            ("(if (quote x) 1 2)", success(1)),
            ("(if #t 1 undefined-var)", success(1)),
            ("(if #t 1)", SpecificError("ArityError")),
            ("(if #t 1 2 3)", SpecificError("ArityError")),
            // === ARITHMETIC AND COMPARISON ===
            ("(+ 1 2 3)", success(6)),
            ("(- 10 (* 2 3))", success(4)),
            ("(/ 7 2)", success(3.5)),
            ("(/ 1 0)", SpecificError("Division by zero")),
            ("(< 1 2 3)", success(true)),
            ("(= 2 2.0)", success(true)),
            ("(sqrt 16)", success(4.0)),
            ("(sqrt -1)", SpecificError("math domain error")),
            // === AND / OR ===
            ("(and)", success(true)),
            ("(or)", success(false)),
            ("(and 1 2 3)", success(3)),
            ("(and 1 #f undefined-var)", success(false)),
            ("(and 1 (quote ()) 3)", EvalResult(nil())),
            ("(or #f (quote ()) 7)", success(7)),
            ("(or 5 undefined-var)", success(5)),
            ("(or #f #f)", success(false)),
            ("(or #f undefined-var)", SpecificError("Unbound variable: undefined-var")),
            // === LAMBDA AND APPLICATION ===
            ("((lambda (x y) (+ x y)) 3 4)", success(7)),
            ("((lambda () 42))", success(42)),
            ("((lambda (x) (* x x)) 5)", success(25)),
            ("(((lambda (x) (lambda (y) (+ x y))) 3) 4)", success(7)),
            ("((lambda (f) (f 7)) (lambda (n) (* n n)))", success(49)),
            ("((lambda (x y) (+ x y)) 1)", SpecificError("expected 2 arguments but got 1")),
            ("((lambda (x y) (+ x y)) 1 2 3)", SpecificError("expected 2 arguments but got 3")),
            ("(lambda (x x) x)", SpecificError("Duplicate parameter name: x")),
            ("(lambda (x 1) x)", SpecificError("Lambda parameters must be symbols")),
            ("(lambda x x)", SpecificError("Lambda parameters must be a list")),
            ("(lambda (x))", SpecificError("ArityError")),
            ("(lambda (x) x x)", SpecificError("ArityError")),
            ("(procedure? (lambda (x) x))", success(true)),
            ("(procedure? car)", success(true)),
            ("(procedure? (quote car))", success(false)),
            // === BEGIN ===
            ("(begin 1 2 3)", success(3)),
            ("(begin (define x 5) (+ x 1))", success(6)),
            ("(begin)", SpecificError("ArityError")),
            // === DEFINE / SET! ===
            ("(define x 10)", EvalResult(Value::Unspecified)),
            ("(define 1 2)", SpecificError("define requires a symbol")),
            ("(set! 1 2)", SpecificError("set! requires a symbol")),
            ("(set! never-defined 1)", SpecificError("Unbound variable: never-defined")),
            ("(define x)", SpecificError("ArityError")),
            // === EQUALITY ===
            ("(eq? (quote a) (quote a))", success(true)),
            ("(eq? (list 1 2) (list 1 2))", success(false)),
            ("(equal? (list 1 2) (list 1 2))", success(true)),
            ("(eq? (quote ()) (list))", success(true)),
            ("(eq? car car)", success(true)),
            ("(equal? 1 1.0)", success(false)),
            // === LISTS ===
            ("(car (quote (1 2 3)))", success(1)),
            ("(cdr (quote (1 2 3)))", success([2, 3])),
            ("(cons 1 (quote (2 3)))", success([1, 2, 3])),
            ("(append (list 1) (list 2 3))", success([1, 2, 3])),
            ("(length (list 1 2 3))", success(3)),
            ("(car (quote ()))", SpecificError("car of empty list")),
            // === ERRORS ===
            ("()", SpecificError("Cannot evaluate empty list")),
            ("undefined-var", SpecificError("Unbound variable: undefined-var")),
            ("(1 2 3)", SpecificError("Cannot apply non-function: 1")),
            ("((quote f) 1)", SpecificError("Cannot apply non-function: f")),
            ("(car 1 2)", SpecificError("ArityError")),
            ("(+ 1 (quote a))", AnyError),
            ("(not)", SpecificError("ArityError")),
        ];

        run_comprehensive_tests(test_cases);
    }

    #[test]
    fn test_stateful_environments() {
        let environments = vec![
            // define in an inner scope leaves the outer binding alone
            TestEnvironment(vec![
                test_setup!("(define x 1)"),
                test_setup!("(define shadow (lambda (x) (begin (define x 99) x)))"),
                ("(shadow 5)", success(99)),
                ("x", success(1)),
            ]),
            // set! through a closure mutates the originating binding
            TestEnvironment(vec![
                test_setup!("(define counter 0)"),
                test_setup!("(define bump (lambda () (begin (set! counter (+ counter 1)) counter)))"),
                ("(bump)", success(1)),
                ("(bump)", success(2)),
                ("counter", success(2)),
            ]),
            // closures see later definitions in the environment they captured
            TestEnvironment(vec![
                test_setup!("(define get-later (lambda () later))"),
                ("(get-later)", SpecificError("Unbound variable: later")),
                test_setup!("(define later 7)"),
                ("(get-later)", success(7)),
            ]),
            // private state per closure
            TestEnvironment(vec![
                test_setup!(
                    "(define make-counter (lambda () (begin (define n 0) (lambda () (begin (set! n (+ n 1)) n)))))"
                ),
                test_setup!("(define c1 (make-counter))"),
                test_setup!("(define c2 (make-counter))"),
                ("(c1)", success(1)),
                ("(c1)", success(2)),
                ("(c2)", success(1)),
                ("n", SpecificError("Unbound variable: n")),
            ]),
            // arguments are evaluated left to right
            TestEnvironment(vec![
                test_setup!("(define trail (list))"),
                test_setup!("(define note (lambda (x) (begin (set! trail (cons x trail)) x)))"),
                ("(list (note 1) (note 2) (note 3))", success([1, 2, 3])),
                ("trail", success([3, 2, 1])),
                ("(+ (note 10) (note 20))", success(30)),
                ("(car trail)", success(20)),
            ]),
            // the operator is evaluated before any argument
            TestEnvironment(vec![
                test_setup!("(define flag 0)"),
                test_setup!("(define pick (lambda () (begin (set! flag 1) list)))"),
                ("((pick) flag)", success([1])),
            ]),
            // set! never creates a binding
            TestEnvironment(vec![
                ("(set! fresh 1)", SpecificError("Unbound variable: fresh")),
                ("fresh", SpecificError("Unbound variable: fresh")),
            ]),
            // primitives can be rebound and passed around
            TestEnvironment(vec![
                test_setup!("(define f +)"),
                ("(f 1 2)", success(3)),
                test_setup!("(define + -)"),
                ("(+ 5 3)", success(2)),
            ]),
            // special-form keywords are not shadowed by definitions
            TestEnvironment(vec![
                test_setup!("(define quote 5)"),
                ("(quote x)", EvalResult(sym("x"))),
            ]),
        ];

        run_tests_in_environment(environments);
    }

    #[test]
    fn test_recursive_functions() {
        // Closures capture their environment by reference, so a function
        // defined at top level can call itself by name.
        let recursive_test_cases = vec![
            TestEnvironment(vec![
                test_setup!("(define factorial (lambda (n) (if (= n 0) 1 (* n (factorial (- n 1))))))"),
                ("(factorial 5)", success(120)),
                ("(factorial 10)", success(3_628_800)),
            ]),
            TestEnvironment(vec![
                test_setup!("(define is-even (lambda (n) (if (= n 0) #t (is-odd (- n 1)))))"),
                test_setup!("(define is-odd (lambda (n) (if (= n 0) #f (is-even (- n 1)))))"),
                ("(is-even 4)", success(true)),
                ("(is-odd 3)", success(true)),
                ("(is-odd 4)", success(false)),
            ]),
            TestEnvironment(vec![
                test_setup!(
                    "(define countdown (lambda (n) (if (<= n 0) (list) (cons n (countdown (- n 1))))))"
                ),
                ("(countdown 3)", success([3, 2, 1])),
            ]),
            TestEnvironment(vec![
                test_setup!("(define fib (lambda (n) (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2))))))"),
                ("(fib 10)", success(55)),
            ]),
        ];

        run_tests_in_environment(recursive_test_cases);
    }

    #[test]
    fn test_evaluation_depth_limit() {
        let env = create_global_env();
        let config = EvalConfig { max_depth: 64 };
        for setup in [
            "(define spin (lambda (n) (spin n)))",
            "(define make-deep (lambda (depth) (if (= depth 0) 42 (+ 1 (make-deep (- depth 1))))))",
        ] {
            eval_with_config(&read(setup).unwrap(), &env, &config).unwrap();
        }

        let shallow = eval_with_config(&read("(make-deep 3)").unwrap(), &env, &config).unwrap();
        assert_eq!(shallow, val(45));

        for runaway in ["(spin 1)", "(make-deep 1000)"] {
            let err = eval_with_config(&read(runaway).unwrap(), &env, &config).unwrap_err();
            assert!(
                matches!(&err, Error::EvalError(msg) if msg.contains("depth limit exceeded (max: 64)")),
                "unexpected error for {runaway}: {err:?}"
            );
        }

        // The environment is still usable afterwards
        let after = eval_with_config(&read("(make-deep 2)").unwrap(), &env, &config).unwrap();
        assert_eq!(after, val(44));
    }

    #[test]
    fn test_default_depth_limit_is_recoverable() {
        // Debug-build frames are large; give the default limit room to trip
        // before the native stack does.
        let handle = std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(|| {
                let env = create_global_env();
                eval(&read("(define spin (lambda (n) (spin n)))").unwrap(), &env).unwrap();
                let err = eval(&read("(spin 1)").unwrap(), &env).unwrap_err();
                format!("{err}")
            })
            .unwrap();
        let message = handle.join().unwrap();
        assert!(message.contains(&format!("(max: {MAX_EVAL_DEPTH})")), "{message}");
    }

    #[test]
    fn test_error_context_is_innermost_only() {
        let env = create_global_env();
        let expr = read("(+ 1 (* 2 (car (quote ()))))").unwrap();
        let Error::TypeError(msg) = eval(&expr, &env).unwrap_err() else {
            panic!("expected TypeError");
        };
        assert_eq!(msg.matches("while evaluating").count(), 1, "{msg}");
        assert!(msg.ends_with("while evaluating: (car (quote ()))"), "{msg}");
    }

    #[test]
    fn test_special_form_arity_error_carries_expression() {
        let env = create_global_env();
        let err = eval(&read("(if #t 1)").unwrap(), &env).unwrap_err();
        assert_eq!(
            err,
            Error::arity_error_with_expr(3, 2, "(if #t 1)".to_owned())
        );
    }

    #[test]
    fn test_apply_public() {
        let env = create_global_env();
        let add = env.lookup("+").unwrap();
        assert_eq!(apply(&add, vec![val(1), val(2)]).unwrap(), val(3));

        let square = eval(&read("(lambda (x) (* x x))").unwrap(), &env).unwrap();
        assert_eq!(apply(&square, vec![val(9)]).unwrap(), val(81));
        assert_eq!(
            apply(&square, vec![]).unwrap_err(),
            Error::arity_error(1, 0)
        );
        assert!(matches!(
            apply(&val(1), vec![]),
            Err(Error::TypeError(_))
        ));
    }

    #[test]
    fn test_builtin_function_self_evaluation() {
        let env = create_global_env();
        eval(&read("(define f +)").unwrap(), &env).unwrap();
        let result = eval(&read("f").unwrap(), &env).unwrap();
        match result {
            Value::BuiltinFunction { id, .. } => assert_eq!(id, "+"),
            _ => panic!("Expected BuiltinFunction to be self-evaluating"),
        }
    }

    #[test]
    fn test_root_environment_is_empty() {
        let root = make_root_environment();
        assert!(root.get_all_bindings().is_empty());
        assert_eq!(
            eval(&read("(+ 1 2)").unwrap(), &root),
            Err(Error::UnboundVariable("+".to_owned()))
        );
        // Special forms still work without primitives
        assert_eq!(eval(&read("(quote a)").unwrap(), &root).unwrap(), sym("a"));
    }

    #[test]
    fn test_global_environment_contents() {
        let env = create_global_env();
        let names: Vec<String> = env.get_all_bindings().into_iter().map(|(n, _)| n).collect();
        for expected in ["+", "car", "equal?", "print", "null", "pi", "e", "atan2"] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
        for absent in ["quote", "if", "define", "lambda", "load"] {
            assert!(!names.iter().any(|n| n == absent), "unexpected {absent}");
        }
    }

    #[test]
    fn test_register_builtin_operation_typed() {
        fn hypot(a: Number, b: Number) -> f64 {
            a.as_f64().hypot(b.as_f64())
        }
        fn forty_two() -> i64 {
            42
        }
        fn safe_div(a: Number, b: Number) -> Result<Number, Error> {
            a.checked_div(b)
        }

        let env = create_global_env();
        env.register_builtin_operation::<_, (Number, Number)>("hypot", hypot);
        env.register_builtin_operation::<_, ()>("forty-two", forty_two);
        env.register_builtin_operation::<_, (Number, Number)>("safe-div", safe_div);

        let run = |src: &str| eval(&read(src).unwrap(), &env);
        assert_eq!(run("(hypot 3 4)").unwrap(), val(5.0));
        assert_eq!(run("(forty-two)").unwrap(), val(42));
        assert_eq!(run("(safe-div 9 3)").unwrap(), val(3.0));
        assert!(matches!(run("(safe-div 1 0)"), Err(Error::EvalError(_))));
        assert!(matches!(run("(hypot 3)"), Err(Error::ArityError { .. })));
        assert!(matches!(run("(hypot 3 (quote x))"), Err(Error::TypeError(_))));
    }

    #[test]
    fn test_register_builtin_operation_list_parameter() {
        fn sum_list(nums: NumIter<'_>) -> f64 {
            nums.map(Number::as_f64).sum()
        }

        let env = create_global_env();
        env.register_builtin_operation::<_, (NumIter<'static>,)>("sum-list", sum_list);

        let run = |src: &str| eval(&read(src).unwrap(), &env);
        assert_eq!(run("(sum-list (list 1 2 3.5))").unwrap(), val(6.5));
        assert!(matches!(run("(sum-list 1)"), Err(Error::TypeError(_))));
        assert!(matches!(run("(sum-list (list 1 (quote a)))"), Err(Error::TypeError(_))));
    }

    #[test]
    fn test_register_variadic_builtin_operation_with_explicit_arity() {
        fn weighted_sum(weight: Number, nums: NumIter<'_>) -> f64 {
            nums.map(|n| weight.as_f64() * n.as_f64()).sum()
        }
        fn count_symbols(args: ValueIter<'_>) -> i64 {
            args.filter(|v| v.is_symbol()).map(|_| 1).sum()
        }

        let env = create_global_env();
        env.register_variadic_builtin_operation::<_, (Number, NumIter<'static>)>(
            "weighted-sum",
            Arity::AtLeast(2),
            weighted_sum,
        );
        env.register_variadic_builtin_operation::<_, (ValueIter<'static>,)>(
            "count-symbols",
            Arity::Any,
            count_symbols,
        );

        let run = |src: &str| eval(&read(src).unwrap(), &env);
        assert_eq!(run("(weighted-sum 2 1 2 3)").unwrap(), val(12.0));
        assert_eq!(
            run("(weighted-sum 2)").unwrap_err(),
            Error::arity_error(2, 1)
        );
        assert_eq!(run("(count-symbols (quote a) 1 (quote b))").unwrap(), val(2));
        assert_eq!(run("(count-symbols)").unwrap(), val(0));
    }

    #[test]
    fn test_register_builtin_function_raw() {
        fn first_or_nil(args: &[Value]) -> Result<Value, Error> {
            Ok(args.first().cloned().unwrap_or_else(nil))
        }

        let env = make_root_environment();
        env.register_builtin_function("first-or-nil", first_or_nil);
        let run = |src: &str| eval(&read(src).unwrap(), &env);
        assert_eq!(run("(first-or-nil 1 2)").unwrap(), val(1));
        assert_eq!(run("(first-or-nil)").unwrap(), nil());
    }
}
