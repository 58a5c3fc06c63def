use std::io::Write;

use clap::{Args, Parser, Subcommand};

use loxide::ast::Stmt;
use loxide::interpreter::{Interpreter, RuntimeError, Value};
use loxide::parser::ParseErrors;
use loxide::resolver::ResolveErrors;
use loxide::scanner::ScanErrors;

#[derive(Debug, Parser)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

impl Cli {
    pub fn command(&self) -> &Command {
        self.command.as_ref().unwrap_or(&Command::Repl)
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    Run(RunArgs),
    Repl,
}

#[derive(Debug, Args)]
struct RunArgs {
    file: String,
}

fn main() {
    let args = Cli::parse();

    match args.command() {
        Command::Repl => {
            repl_command();
        }
        Command::Run(args) => {
            run_command(args);
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanErrors),
    #[error(transparent)]
    Parse(#[from] ParseErrors),
    #[error(transparent)]
    Resolve(#[from] ResolveErrors),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

fn run(source: &str, interpreter: &mut Interpreter) -> Result<Option<Value>, RunError> {
    let tokens = loxide::scanner::scan(source)?;
    let program = loxide::parser::program(&tokens)?;

    // Execution only starts once the program is statically clean.
    let locals = loxide::resolver::resolve(&program)?;
    interpreter.resolve(locals);

    // A lone bare expression is evaluated rather than executed so the REPL
    // can echo its value.
    if let [Stmt::Expression(expr)] = program.0.as_slice() {
        return Ok(Some(interpreter.evaluate(expr)?));
    }

    interpreter.interpret(&program)?;
    Ok(None)
}

fn run_command(args: &RunArgs) {
    let source = match std::fs::read_to_string(&args.file) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Could not read {}: {}", args.file, e);
            std::process::exit(66);
        }
    };

    let mut interpreter = Interpreter::default();
    match run(&source, &mut interpreter) {
        Ok(_) => {}
        Err(RunError::Runtime(e)) => {
            eprintln!("{e}");
            std::process::exit(70);
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(65);
        }
    }
}

fn repl_command() {
    println!("Welcome to the Loxide REPL!");
    println!("EOF to exit. (Ctrl+D on *nix, Ctrl+Z on Windows)");

    let mut interpreter = Interpreter::default();
    let mut input = String::new();

    loop {
        print!("> ");
        std::io::stdout()
            .flush()
            .expect("should be able to flush stdout");

        let read = std::io::stdin()
            .read_line(&mut input)
            .expect("should be able to read line from stdin");

        if read == 0 {
            break;
        }

        let source = input.trim();
        if !source.is_empty() {
            match run(source, &mut interpreter) {
                Ok(Some(value)) => println!("{}", value),
                Ok(None) => {}
                Err(e) => println!("{}", e),
            }
        }

        input.clear();
    }
}
