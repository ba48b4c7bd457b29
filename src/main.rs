// ABOUTME: Thin CLI/REPL driver exercising the analyze/evaluate core end to end

use std::path::PathBuf;

use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use heist_scheme_core::error::SchemeError;
use heist_scheme_core::{eval_datum, eval_source, new_global_environment};

/// A Scheme interpreter core: analyze/evaluate, hygienic macros, CPS-based continuations.
#[derive(Parser, Debug)]
#[command(name = "heist")]
#[command(version)]
#[command(about = "Scheme analyze/evaluate core REPL and script runner")]
struct CliArgs {
    /// Script file to execute (omit to start the REPL)
    #[arg(value_name = "FILE")]
    script: Option<PathBuf>,

    /// Maximum recursion depth for non-tail-recursive compound calls
    #[arg(long = "max-recursion-depth", value_name = "N")]
    max_recursion_depth: Option<usize>,
}

fn main() {
    let args = CliArgs::parse();
    if let Some(n) = args.max_recursion_depth {
        heist_scheme_core::eval::set_max_recursion_depth(n);
    }

    let env = new_global_environment();

    if let Some(path) = args.script {
        match std::fs::read_to_string(&path) {
            Ok(source) => {
                if let Err(e) = eval_source(&source, &env) {
                    report_error(&e);
                    std::process::exit(exit_code(&e));
                }
            }
            Err(e) => {
                eprintln!("cannot read {}: {e}", path.display());
                std::process::exit(1);
            }
        }
        return;
    }

    run_repl(&env);
}

fn exit_code(e: &SchemeError) -> i32 {
    match e {
        SchemeError::Exit(code) => *code,
        _ => 1,
    }
}

fn report_error(e: &SchemeError) {
    match e {
        SchemeError::Exit(_) => {}
        SchemeError::Jump(v) => eprintln!("uncaught jump!: {v}"),
        other => eprintln!("error: {other}"),
    }
}

fn run_repl(env: &std::rc::Rc<heist_scheme_core::env::Environment>) {
    println!("heist scheme core — analyze/evaluate REPL");
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("failed to initialize line editor: {e}");
            return;
        }
    };
    let history_file = ".heist_history";
    let _ = rl.load_history(history_file);

    loop {
        match rl.readline("heist> ") {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());
                if line.trim().is_empty() {
                    continue;
                }
                match heist_scheme_core::reader::parse_one(&line) {
                    Ok(form) => match eval_datum(&form, env) {
                        Ok(value) => println!("=> {value}"),
                        Err(SchemeError::Exit(code)) => {
                            let _ = rl.save_history(history_file);
                            std::process::exit(code);
                        }
                        Err(e) => report_error(&e),
                    },
                    Err(e) => eprintln!("parse error: {e}"),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!();
                break;
            }
            Err(e) => {
                eprintln!("readline error: {e}");
                break;
            }
        }
    }
    let _ = rl.save_history(history_file);
}
