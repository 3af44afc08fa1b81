//! This module describes a [Span] that is used to localize things inside the source code. It's
//! the byte offset plus the byte length of a piece of text, and it's the only location
//! information carried by tokens and tree nodes.

use std::fmt::Display;

/// Byte range of a piece of source text.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub offset: usize,
    pub len: usize,
}

impl Span {
    pub fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    /// The first byte after the span.
    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    /// Creates a span that starts at `self` and finishes at the end of `other`.
    pub fn to(self, other: Span) -> Span {
        Span::new(self.offset, other.end().saturating_sub(self.offset))
    }
}

impl Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.offset, self.end())
    }
}

impl From<Span> for miette::SourceSpan {
    fn from(span: Span) -> Self {
        (span.offset, span.len).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_spans() {
        let open = Span::new(3, 1);
        let close = Span::new(10, 1);

        assert_eq!(open.to(close), Span::new(3, 8));
        assert_eq!(open.to(close).to_string(), "3..11");
    }
}
