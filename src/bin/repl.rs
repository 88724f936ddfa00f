//! sexpeval command line.
//!
//! Without arguments it starts an interactive read-eval-print loop. With
//! arguments, each file is loaded in order into one global environment, so
//! later files see earlier definitions; the first error aborts with a
//! non-zero exit status.

use std::env;

use anyhow::Context;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use sexpeval::ast::Value;
use sexpeval::loader::{load_file, strip_comments};
use sexpeval::{Environment, Error, ParseError, ParseErrorKind, create_global_env, eval, read_all};

const PROMPT: &str = "sexpeval> ";
const CONTINUATION_PROMPT: &str = "      ... ";

fn main() -> Result<(), anyhow::Error> {
    init_tracing();

    let paths: Vec<String> = env::args().skip(1).collect();
    if paths.is_empty() {
        run_repl()
    } else {
        run_all_files(&paths)
    }
}

/// Log to stderr, filtered by `RUST_LOG` (e.g. `RUST_LOG=sexpeval=trace`).
fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    if env::var("RUST_LOG").is_ok() {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .with(EnvFilter::from_default_env())
            .init();
    }
}

fn run_all_files(paths: &[String]) -> Result<(), anyhow::Error> {
    let env = create_global_env();
    for path in paths {
        load_file(path, &env).with_context(|| format!("failed to load {path}"))?;
    }
    Ok(())
}

fn run_repl() -> Result<(), anyhow::Error> {
    println!("sexpeval - minimal Scheme-like expression evaluator");
    println!("Enter S-expressions like: (+ 1 2)");
    println!("Type :help for more commands, or Ctrl+D to exit.");
    println!();

    let mut rl = DefaultEditor::new().context("could not initialize line editor")?;
    let env = create_global_env();

    // Lines of an expression still missing its closing parens
    let mut pending = String::new();

    loop {
        let prompt = if pending.is_empty() {
            PROMPT
        } else {
            CONTINUATION_PROMPT
        };

        let line = match rl.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Eof | ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => return Err(err.into()),
        };

        let trimmed = line.trim();
        if pending.is_empty() {
            if trimmed.is_empty() {
                continue;
            }
            let _ = rl.add_history_entry(trimmed);

            if let Some(command) = trimmed.strip_prefix(':') {
                match run_command(command, &env) {
                    CommandOutcome::Continue => continue,
                    CommandOutcome::Quit => {
                        println!("Goodbye!");
                        break;
                    }
                }
            }
        } else {
            let _ = rl.add_history_entry(trimmed);
        }

        pending.push_str(&line);
        pending.push('\n');

        match read_all(&strip_comments(&pending)) {
            Err(Error::SyntaxError(ParseError {
                kind: ParseErrorKind::Incomplete,
                ..
            })) => continue,
            Err(e) => println!("Error: {e}"),
            Ok(exprs) => {
                for expr in &exprs {
                    match eval(expr, &env) {
                        Ok(value) => print_value(&value),
                        Err(e) => {
                            println!("Error: {e}");
                            break;
                        }
                    }
                }
            }
        }
        pending.clear();
    }

    Ok(())
}

enum CommandOutcome {
    Continue,
    Quit,
}

fn run_command(command: &str, env: &Environment) -> CommandOutcome {
    let (name, argument) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };

    match name {
        "help" => print_help(),
        "env" => print_environment(env),
        "load" if argument.is_empty() => println!("Usage: :load FILE"),
        "load" => match load_file(argument, env) {
            Ok(value) => print_value(&value),
            Err(e) => println!("Error: {e}"),
        },
        "quit" | "exit" => return CommandOutcome::Quit,
        _ => println!("Unknown command :{name} (try :help)"),
    }
    CommandOutcome::Continue
}

fn print_value(value: &Value) {
    // Forms evaluated for effect (e.g. define) print nothing
    if !matches!(value, Value::Unspecified) {
        println!("{value}");
    }
}

fn print_help() {
    println!("Commands:");
    println!("  :help       - Show this help message");
    println!("  :env        - Show current environment bindings");
    println!("  :load FILE  - Evaluate every expression in FILE");
    println!("  :quit       - Exit the interpreter");
    println!("  :exit       - Exit the interpreter");
    println!("  Ctrl+D      - Exit the interpreter");
    println!();
    println!("Special forms:");
    println!("  (quote x)  (if test then else)  (define name expr)  (set! name expr)");
    println!("  (lambda (params...) body)  (begin expr...)  (and expr...)  (or expr...)");
    println!();
    println!("Examples:");
    println!("  (define square (lambda (x) (* x x)))");
    println!("  (square 12)");
    println!("  (if (> 2 1) (quote yes) (quote no))");
    println!();
}

fn print_environment(env: &Environment) {
    let bindings = env.get_all_bindings();

    if bindings.is_empty() {
        println!("Environment is empty.");
        return;
    }

    println!("Environment bindings ({} total):", bindings.len());
    println!();

    // Separate built-in functions from user-defined values
    let mut builtins = Vec::new();
    let mut user_defined = Vec::new();

    for (name, value) in bindings {
        match value {
            Value::BuiltinFunction { .. } => builtins.push(name),
            _ => user_defined.push((name, value)),
        }
    }

    if !builtins.is_empty() {
        println!("Built-in functions ({}):", builtins.len());
        // Print in columns for readability
        for row in builtins.chunks(4) {
            for name in row {
                print!("  {name:<15}");
            }
            println!();
        }
        println!();
    }

    if !user_defined.is_empty() {
        println!("User-defined values ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {value}");
        }
    }
}
