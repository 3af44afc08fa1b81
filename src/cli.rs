use std::path::PathBuf;

use clap::{ArgAction, Parser};

use nisc::pipeline::DEFAULT_CAPACITY;

/// Reads scheme source and prints its high level bytecode.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Options {
    /// The file to compile.
    #[arg(required_unless_present = "repl")]
    pub file: Option<PathBuf>,

    /// Starts a repl session.
    #[arg(short, long)]
    pub repl: bool,

    /// Arena capacity in bytes.
    #[arg(short, long, default_value_t = DEFAULT_CAPACITY)]
    pub capacity: usize,

    /// Raises the log level, once for debug and twice for trace.
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only prints the bytecode.
    #[arg(long)]
    pub no_forms: bool,
}
