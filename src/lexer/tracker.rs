//! This module defines a [Tracker] structure that is used to keep track of the position of the
//! lexer inside of the source code.

use crate::location::Span;

/// Keeps track of the current position in the source code and helps cutting out substrings. It's
/// used for lexing.
pub struct Tracker<'a> {
    current: usize,
    saved: Vec<usize>,
    string: &'a str,
}

impl<'a> Tracker<'a> {
    pub fn new(string: &'a str) -> Self {
        Self {
            current: 0,
            saved: Vec::with_capacity(12),
            string,
        }
    }

    fn rest(&self) -> &'a str {
        &self.string[self.current..]
    }

    /// Peeks the next character.
    pub fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// Peeks the character after the next one.
    pub fn peek_second(&self) -> Option<char> {
        self.rest().chars().nth(1)
    }

    /// Whether the remaining source starts with `prefix`.
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.rest().starts_with(prefix)
    }

    /// Gets the next character.
    pub fn next(&mut self) -> Option<char> {
        let next = self.peek();
        if let Some(c) = next {
            self.current += c.len_utf8();
        }
        next
    }

    /// Jumps to the next character without returning a char.
    pub fn jump(&mut self) {
        self.next();
    }

    /// Consumes characters while `predicate` holds.
    pub fn jump_while(&mut self, predicate: impl Fn(char) -> bool) {
        while self.peek().map(&predicate).unwrap_or_default() {
            self.jump();
        }
    }

    pub fn save(&mut self) {
        self.saved.push(self.current)
    }

    /// Saves the current position and then jumps one character.
    pub fn save_jump(&mut self) {
        self.save();
        self.next();
    }

    /// Returns the span between the last saved position and the current one.
    pub fn pop_span(&mut self) -> Span {
        let start = self.saved.pop().unwrap_or(self.current);
        Span::new(start, self.current - start)
    }

    /// Gets the substring of the source code covered by a span.
    pub fn substring(&self, span: Span) -> &'a str {
        &self.string[span.offset..span.end()]
    }
}
