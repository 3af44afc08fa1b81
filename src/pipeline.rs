//! The whole front end in one call: source text in, forms and disassembly out.

use std::fmt::{self, Display};

use crate::error::{InnerError, NiscError, Stage};
use crate::gc::{Gc, GcStats};
use crate::lexer::lex;
use crate::lower::to_bytecode;
use crate::parser::parse;

/// Arena size used when none is given.
pub const DEFAULT_CAPACITY: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Compiled {
    /// Every top level form, printed back.
    pub forms: Vec<String>,
    pub disassembly: String,
    pub stats: GcStats,
}

impl Display for Compiled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for form in &self.forms {
            writeln!(f, "{form}")?;
        }
        write!(f, "{}", self.disassembly)
    }
}

/// Lexes, reads, lowers and verifies `source` inside a fresh arena of `capacity` bytes. `name`
/// is only used to label the diagnostics.
pub fn compile(name: &str, source: &str, capacity: usize) -> Result<Compiled, NiscError> {
    let fail = |stage: Stage, related: Vec<InnerError>| NiscError::new(name, source, stage, related);

    let mut gc = Gc::new(capacity).map_err(|fault| fail(Stage::Arena, vec![fault.into()]))?;

    let tokens = lex(source).map_err(|error| fail(Stage::Lex, vec![error.into()]))?;
    tracing::info!(tokens = tokens.len(), "lexed {name}");

    let forms = parse(&mut gc, &tokens).map_err(|failure| fail(Stage::Read, failure.into()))?;
    tracing::info!(forms = forms.len(), "read {name}");

    let printed = forms
        .iter()
        .map(|form| gc.display(*form).to_string())
        .collect();

    let program = to_bytecode(&gc, &forms).map_err(|failure| fail(Stage::Lower, failure.into()))?;
    tracing::info!(functions = program.functions().len(), "lowered {name}");

    program
        .verify()
        .map_err(|error| fail(Stage::Verify, vec![error.into()]))?;

    let stats = gc.stats();
    tracing::debug!(%stats, "arena after {name}");

    Ok(Compiled {
        forms: printed,
        disassembly: program.display(&gc).to_string(),
        stats,
    })
}
