use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

use monkey::compiler::Compiler;
use monkey::parser::{self, SyntaxError};
use monkey::session::{EvalError, Session};
use monkey::vm::Vm;

/// Compile Monkey source to bytecode and run it on a stack VM.
#[derive(Parser)]
#[command(name = "monkey", version)]
struct Cli {
    /// Source file to run. Starts a REPL when neither a file nor --eval is given.
    file: Option<PathBuf>,

    /// Run CODE and print the value of its last expression.
    #[arg(short, long, value_name = "CODE", conflicts_with = "file")]
    eval: Option<String>,

    /// Print an intermediate form instead of running.
    #[arg(long, value_enum)]
    emit: Option<Emit>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Emit {
    /// The parsed program as JSON.
    Ast,
    /// Disassembled instructions and constant pool.
    Bytecode,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let (source, print_result) = match (cli.eval, cli.file) {
        (Some(code), _) => (code, true),
        (None, Some(path)) => match std::fs::read_to_string(&path) {
            Ok(s) => (s, false),
            Err(e) => {
                eprintln!("Error reading {}: {}", path.display(), e);
                process::exit(1);
            }
        },
        (None, None) => {
            run_repl();
            return;
        }
    };

    let outcome = match cli.emit {
        Some(Emit::Ast) => emit_ast(&source),
        Some(Emit::Bytecode) => emit_bytecode(&source),
        None => run_program(&source, print_result),
    };
    if let Err(message) = outcome {
        eprintln!("{}", message);
        process::exit(1);
    }
}

/// Log filter comes from `MONKEY_LOG` (e.g. `MONKEY_LOG=monkey=trace`).
fn init_tracing() {
    let filter = EnvFilter::try_from_env("MONKEY_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn parse(source: &str) -> Result<monkey::ast::Program, String> {
    parser::parse_source(source).map_err(|e| format_syntax_error(&e))
}

fn format_syntax_error(err: &SyntaxError) -> String {
    match err {
        SyntaxError::Lex(e) => format!(" • {}", e),
        SyntaxError::Parse(errors) => errors
            .iter()
            .map(|e| format!(" • {}", e))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn emit_ast(source: &str) -> Result<(), String> {
    let program = parse(source)?;
    let json = serde_json::to_string_pretty(&program)
        .map_err(|e| format!("Serialization error: {}", e))?;
    println!("{}", json);
    Ok(())
}

fn emit_bytecode(source: &str) -> Result<(), String> {
    let program = parse(source)?;
    let mut compiler = Compiler::new();
    compiler
        .compile(&program)
        .map_err(|e| format!("Compilation failed: {}", e))?;
    print!("{}", compiler.bytecode().disassemble());
    Ok(())
}

fn run_program(source: &str, print_result: bool) -> Result<(), String> {
    let program = parse(source)?;
    let mut compiler = Compiler::new();
    compiler
        .compile(&program)
        .map_err(|e| format!("Compilation failed: {}", e))?;

    let mut vm = Vm::new(compiler.bytecode());
    vm.run().map_err(|e| format!("Executing bytecode failed: {}", e))?;
    if print_result {
        if let Some(value) = vm.last_popped() {
            println!("{}", value.inspect());
        }
    }
    Ok(())
}

// ── REPL ─────────────────────────────────────────────────────────────

fn run_repl() {
    let mut rl = match rustyline::DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("failed to start line editor: {}", e);
            process::exit(1);
        }
    };

    println!("Welcome to MONKEY");
    println!("Try out the language below\n");

    let mut session = Session::new();
    loop {
        let line = match rl.readline(">> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(line.as_str());

        match session.eval(&line) {
            Ok(Some(value)) => println!("{}", value.inspect()),
            Ok(None) => {}
            Err(EvalError::Syntax(e)) => eprintln!("{}", format_syntax_error(&e)),
            Err(EvalError::Compile(e)) => eprintln!("Whoops! Compilation failed\n {}\n", e),
            Err(EvalError::Runtime(e)) => eprintln!("Whoops! Executing bytecode failed\n {}\n", e),
        }
    }
}
