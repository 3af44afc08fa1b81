//! The top level diagnostic. Every stage keeps its own error type, and [NiscError] bundles all
//! of them with the source text so that `miette` can render the labels.

use std::fmt::{self, Display};

use miette::NamedSource;

use crate::gc::AllocatorFault;
use crate::hlbc::VerifyError;
use crate::lexer::LexError;
use crate::lower::{LowerError, LowerFailure};
use crate::parser::{ParseError, ReadFailure};

/// The stage of the pipeline that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Arena,
    Lex,
    Read,
    Lower,
    Verify,
}

impl Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Arena => write!(f, "arena setup"),
            Stage::Lex => write!(f, "lexing"),
            Stage::Read => write!(f, "reading"),
            Stage::Lower => write!(f, "lowering"),
            Stage::Verify => write!(f, "verification"),
        }
    }
}

#[derive(thiserror::Error, miette::Diagnostic, Debug)]
#[diagnostic(url(docsrs))]
#[error("{stage} failed")]
pub struct NiscError {
    #[source_code]
    pub text_source: NamedSource,

    pub stage: Stage,

    #[related]
    pub related: Vec<InnerError>,
}

impl NiscError {
    pub fn new(name: &str, source: &str, stage: Stage, related: Vec<InnerError>) -> Self {
        Self {
            text_source: NamedSource::new(name, source.to_string()),
            stage,
            related,
        }
    }
}

#[derive(thiserror::Error, miette::Diagnostic, Debug, Clone)]
pub enum InnerError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Lower(#[from] LowerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Fault(#[from] AllocatorFault),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Verify(#[from] VerifyError),
}

impl From<ReadFailure> for Vec<InnerError> {
    fn from(failure: ReadFailure) -> Self {
        failure.errors.into_iter().map(InnerError::from).collect()
    }
}

impl From<LowerFailure> for Vec<InnerError> {
    fn from(failure: LowerFailure) -> Self {
        failure.0.into_iter().map(InnerError::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::location::Span;

    use super::*;

    #[test]
    fn read_failures_keep_every_error() {
        let failure = ReadFailure {
            forms: vec![],
            errors: vec![
                ParseError::UnexpectedEof {
                    span: Span::new(0, 1),
                },
                ParseError::Fault(AllocatorFault::NoInsertionPoint),
            ],
        };

        let related: Vec<InnerError> = failure.into();

        assert_eq!(related.len(), 2);
        assert!(matches!(related[0], InnerError::Parse(ParseError::UnexpectedEof { .. })));
    }

    #[test]
    fn names_the_failed_stage() {
        let error = NiscError::new("input.scm", "(", Stage::Read, vec![]);
        assert_eq!(error.to_string(), "reading failed");
    }
}
