use std::path::PathBuf;

use miette::IntoDiagnostic;
use rustyline::{
    error::ReadlineError, validate::MatchingBracketValidator, Completer, Editor, Helper,
    Highlighter, Hinter, Validator,
};

#[derive(Completer, Helper, Highlighter, Hinter, Validator)]
struct InputValidator {
    #[rustyline(Validator)]
    brackets: MatchingBracketValidator,
}

fn get_history_path() -> Option<PathBuf> {
    let home_env = std::env::var("HOME").ok()?;
    let path = format!("{home_env}/.nisc.history");
    Some(PathBuf::from(path))
}

/// Compiles every entered line against a fresh arena and prelude.
pub fn run(capacity: usize, show_forms: bool) -> miette::Result<()> {
    let mut rl = Editor::new().into_diagnostic()?;
    let path = get_history_path();
    let h = InputValidator {
        brackets: MatchingBracketValidator::new(),
    };

    rl.set_helper(Some(h));

    if let Some(path) = path.clone() {
        if rl.load_history(&path).is_err() {
            println!("No previous history.");
        }
    }

    loop {
        match rl.readline("> ") {
            Ok(line) => {
                rl.add_history_entry(line.as_str()).into_diagnostic()?;

                match nisc::compile("<repl>", &line, capacity) {
                    Ok(compiled) if show_forms => print!("{compiled}"),
                    Ok(compiled) => print!("{}", compiled.disassembly),
                    Err(error) => eprintln!("{:?}", miette::Report::new(error)),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("Interrupted");
                break;
            }
            Err(ReadlineError::Eof) => {
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }

    if let Some(path) = path {
        let _ = rl.append_history(&path);
    }

    Ok(())
}
