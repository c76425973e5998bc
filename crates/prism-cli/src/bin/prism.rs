//! Prism script runner CLI

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use prism_eval::{Arguments, CallContext, Config, Error as EvalError, Interpreter, Outcome, Value};

#[derive(Parser, Debug)]
#[command(name = "prism")]
#[command(about = "Prism script runner - executes a node or function, answering prompts from stdin")]
#[command(version)]
struct Args {
    /// Input Prism script
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Node to execute
    #[arg(short, long, default_value = "main", conflicts_with = "function")]
    node: String,

    /// Function to execute instead of a node
    #[arg(short, long, value_name = "NAME")]
    function: Option<String>,

    /// Named function argument; the value is read as JSON, or as a plain string otherwise
    #[arg(short = 'a', long = "arg", value_name = "KEY=VALUE", value_parser = parse_arg)]
    args: Vec<(String, String)>,

    /// Iterations a single loop may run (0 disables the limit)
    #[arg(long, value_name = "N")]
    loop_limit: Option<usize>,

    /// Do not register types.Thread and types.Lock
    #[arg(long)]
    no_threading: bool,

    /// JSON file with interpreter settings
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print the execution log to stderr when done
    #[arg(long)]
    show_log: bool,
}

fn parse_arg(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

fn argument_value(raw: &str) -> Value {
    Value::from_json(raw).unwrap_or_else(|_| Value::from(raw))
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            Config::from_json(&text)?
        }
        None => Config::default(),
    };
    if let Some(limit) = args.loop_limit {
        config = config.with_loop_limit(limit);
    }
    if args.no_threading {
        config = config.with_threading(false);
    }
    Ok(config)
}

/// Host functions available to scripts run from the command line.
fn register_io(interpreter: &Interpreter) -> prism_eval::Result<()> {
    interpreter.register_scoped_function(
        "io.say",
        |args: &Arguments, _: &CallContext| -> prism_eval::Result<Value> {
            println!("{}", args.require("message")?);
            Ok(Value::None)
        },
    )?;
    interpreter.register_scoped_function(
        "io.ask",
        |args: &Arguments, cx: &CallContext| -> prism_eval::Result<Value> {
            let prompt = args.optional("prompt").cloned().unwrap_or_default();
            cx.suspend(prompt)
        },
    )
}

/// Answer a prompt with the next line of stdin; end of input answers None.
fn answer_from_stdin(prompt: Value) -> prism_eval::Result<Value> {
    if !prompt.is_none() {
        eprint!("{} ", prompt);
        io::stderr().flush().ok();
    }
    let mut line = String::new();
    let read = io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| EvalError::runtime(format!("failed to read a response: {}", e)))?;
    if read == 0 {
        return Ok(Value::None);
    }
    Ok(Value::from(line.trim_end_matches(['\r', '\n'])))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let source = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;

    let interpreter = Interpreter::with_config(&source, config)?;
    register_io(&interpreter)?;

    let execution = match &args.function {
        Some(name) => {
            let call_args: Arguments = args
                .args
                .iter()
                .map(|(key, raw)| (key.clone(), argument_value(raw)))
                .collect();
            tracing::info!(function = %name, "Executing function");
            interpreter.execute_function(name, call_args)?
        }
        None => {
            tracing::info!(node = %args.node, "Executing node");
            interpreter.execute_node(&args.node)?
        }
    };

    let result = execution.drive(answer_from_stdin);

    let offenders = interpreter.release_locks(false);
    if !offenders.is_empty() {
        tracing::warn!(count = offenders.len(), "Threads left locks in use");
    }
    if args.show_log {
        for line in interpreter.log() {
            eprintln!("{}", line);
        }
    }

    match result? {
        Outcome::Exit(value) => {
            tracing::debug!("Execution ended with exit");
            println!("{}", value);
        }
        Outcome::Return(value) => {
            tracing::debug!("Execution ended with return");
            println!("{}", value);
        }
    }
    Ok(())
}
