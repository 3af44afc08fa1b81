//! The lexer turns the source text into a flat list of [Token]s. The main function here is the
//! [lex] function.

use std::fmt::Display;

use crate::location::Span;

use self::tracker::Tracker;

mod tracker;

#[derive(thiserror::Error, miette::Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("`{ch}` is not a valid character")]
    #[diagnostic(code(nisc::lex::invalid_char))]
    InvalidChar {
        ch: char,
        #[label("here")]
        span: Span,
    },

    #[error("invalid number literal")]
    #[diagnostic(code(nisc::lex::invalid_number))]
    InvalidNumber {
        #[label("this is not a number")]
        span: Span,
    },

    #[error("unknown character name")]
    #[diagnostic(code(nisc::lex::unknown_char_name))]
    UnknownCharName {
        #[label("unknown name")]
        span: Span,
    },
}

impl LexError {
    pub fn span(&self) -> Span {
        match self {
            LexError::InvalidChar { span, .. }
            | LexError::InvalidNumber { span }
            | LexError::UnknownCharName { span } => *span,
        }
    }
}

pub type Result<T, E = LexError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Ident,
    Char,
    Int,
    Float,
    Bool,
    Dot,
    SingleQuote,
    U8ParenL,
    VectorL,
    ParenL,
    ParenR,
    Backtick,
    Comma,
    CommaAt,
    DoubleQuote,
    Backslash,
    SquareL,
    SquareR,
    CurlyL,
    CurlyR,
    Hash,
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TokenKind::Ident => "<identifier>",
            TokenKind::Char => "<character>",
            TokenKind::Int => "<integer>",
            TokenKind::Float => "<real>",
            TokenKind::Bool => "<boolean>",
            TokenKind::Dot => "`.`",
            TokenKind::SingleQuote => "`'`",
            TokenKind::U8ParenL => "`#u8(`",
            TokenKind::VectorL => "`#(`",
            TokenKind::ParenL => "`(`",
            TokenKind::ParenR => "`)`",
            TokenKind::Backtick => "`\\``",
            TokenKind::Comma => "`,`",
            TokenKind::CommaAt => "`,@`",
            TokenKind::DoubleQuote => "`\"`",
            TokenKind::Backslash => "`\\\\`",
            TokenKind::SquareL => "`[`",
            TokenKind::SquareR => "`]`",
            TokenKind::CurlyL => "`{`",
            TokenKind::CurlyR => "`}`",
            TokenKind::Hash => "`#`",
        };
        f.write_str(name)
    }
}

/// The value carried by a token, sized to its kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload<'a> {
    None,
    Ident(&'a str),
    Char(char),
    Int(i64),
    Float(f64),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub span: Span,
    pub payload: Payload<'a>,
}

pub fn is_ident_begin(c: char) -> bool {
    c.is_ascii_alphabetic() || "!$%&*+-./:<=>?@^_~".contains(c)
}

pub fn is_ident_cont(c: char) -> bool {
    is_ident_begin(c) || c.is_ascii_digit()
}

pub fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || "()[]{}\";'`,".contains(c)
}

/// Names accepted after `#\`.
const CHAR_NAMES: &[(&str, char)] = &[
    ("alarm", '\u{7}'),
    ("backspace", '\u{8}'),
    ("delete", '\u{7f}'),
    ("escape", '\u{1b}'),
    ("newline", '\n'),
    ("null", '\0'),
    ("return", '\r'),
    ("space", ' '),
    ("tab", '\t'),
];

pub struct Lexer<'a> {
    tracker: Tracker<'a>,
    tokens: Vec<Token<'a>>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            tracker: Tracker::new(source),
            tokens: vec![],
        }
    }

    fn push(&mut self, kind: TokenKind, span: Span, payload: Payload<'a>) {
        self.tokens.push(Token {
            kind,
            span,
            payload,
        });
    }

    /// Lexes a token that is made only of punctuation.
    fn lex_punctuation(&mut self, kind: TokenKind, len: usize) {
        self.tracker.save();
        for _ in 0..len {
            self.tracker.jump();
        }
        let span = self.tracker.pop_span();
        self.push(kind, span, Payload::None);
    }

    fn lex_comment(&mut self) {
        self.tracker.jump_while(|c| c != '\n');
    }

    fn lex_number(&mut self) -> Result<()> {
        self.tracker.save();

        if matches!(self.tracker.peek(), Some('+' | '-')) {
            self.tracker.jump();
        }

        self.tracker.jump_while(|c| c.is_ascii_digit());

        let is_real = self.tracker.peek() == Some('.')
            && self
                .tracker
                .peek_second()
                .map(|c| c.is_ascii_digit())
                .unwrap_or_default();

        if is_real {
            self.tracker.jump();
            self.tracker.jump_while(|c| c.is_ascii_digit());
        }

        if self.tracker.peek().map(|c| !is_delimiter(c)).unwrap_or_default() {
            self.tracker.jump_while(|c| !is_delimiter(c));
            let span = self.tracker.pop_span();
            return Err(LexError::InvalidNumber { span });
        }

        let span = self.tracker.pop_span();
        let text = self.tracker.substring(span);

        if is_real {
            let value = text
                .parse::<f64>()
                .map_err(|_| LexError::InvalidNumber { span })?;
            self.push(TokenKind::Float, span, Payload::Float(value));
        } else {
            let value = text
                .parse::<i64>()
                .map_err(|_| LexError::InvalidNumber { span })?;
            self.push(TokenKind::Int, span, Payload::Int(value));
        }

        Ok(())
    }

    fn lex_identifier(&mut self) {
        self.tracker.save_jump();
        self.tracker.jump_while(is_ident_cont);

        let span = self.tracker.pop_span();
        let text = self.tracker.substring(span);

        if text == "." {
            self.push(TokenKind::Dot, span, Payload::None);
        } else {
            self.push(TokenKind::Ident, span, Payload::Ident(text));
        }
    }

    /// Lexes everything that starts with `#`: booleans, characters, vector openers, or a lone `#`.
    fn lex_hash(&mut self) -> Result<()> {
        self.tracker.save_jump();

        match self.tracker.peek() {
            Some('(') => {
                self.tracker.jump();
                let span = self.tracker.pop_span();
                self.push(TokenKind::VectorL, span, Payload::None);
            }
            Some('\\') => {
                self.tracker.jump();
                return self.lex_char();
            }
            Some('u') if self.tracker.starts_with("u8(") => {
                self.tracker.jump_while(|c| c != '(');
                self.tracker.jump();
                let span = self.tracker.pop_span();
                self.push(TokenKind::U8ParenL, span, Payload::None);
            }
            Some(c) if is_ident_cont(c) => {
                self.tracker.jump_while(is_ident_cont);

                let span = self.tracker.pop_span();
                let value = match self.tracker.substring(span) {
                    "#t" | "#true" => true,
                    "#f" | "#false" => false,
                    _ => return Err(LexError::InvalidChar { ch: '#', span }),
                };
                self.push(TokenKind::Bool, span, Payload::Bool(value));
            }
            _ => {
                let span = self.tracker.pop_span();
                self.push(TokenKind::Hash, span, Payload::None);
            }
        }

        Ok(())
    }

    /// Lexes the rest of a character literal, after `#\`.
    fn lex_char(&mut self) -> Result<()> {
        let Some(first) = self.tracker.next() else {
            let span = self.tracker.pop_span();
            return Err(LexError::UnknownCharName { span });
        };

        if first.is_ascii_alphabetic() {
            self.tracker.jump_while(|c| c.is_ascii_alphabetic());
        }

        let span = self.tracker.pop_span();
        let name = &self.tracker.substring(span)[2..];

        let value = if name.chars().count() == 1 {
            first
        } else {
            CHAR_NAMES
                .iter()
                .find(|(known, _)| *known == name)
                .map(|(_, value)| *value)
                .ok_or(LexError::UnknownCharName { span })?
        };

        self.push(TokenKind::Char, span, Payload::Char(value));

        Ok(())
    }

    pub fn lex(mut self) -> Result<Vec<Token<'a>>> {
        while let Some(c) = self.tracker.peek() {
            match c {
                c if c.is_whitespace() => self.tracker.jump(),
                ';' => self.lex_comment(),
                '(' => self.lex_punctuation(TokenKind::ParenL, 1),
                ')' => self.lex_punctuation(TokenKind::ParenR, 1),
                '[' => self.lex_punctuation(TokenKind::SquareL, 1),
                ']' => self.lex_punctuation(TokenKind::SquareR, 1),
                '{' => self.lex_punctuation(TokenKind::CurlyL, 1),
                '}' => self.lex_punctuation(TokenKind::CurlyR, 1),
                '\'' => self.lex_punctuation(TokenKind::SingleQuote, 1),
                '`' => self.lex_punctuation(TokenKind::Backtick, 1),
                '"' => self.lex_punctuation(TokenKind::DoubleQuote, 1),
                '\\' => self.lex_punctuation(TokenKind::Backslash, 1),
                ',' if self.tracker.peek_second() == Some('@') => {
                    self.lex_punctuation(TokenKind::CommaAt, 2)
                }
                ',' => self.lex_punctuation(TokenKind::Comma, 1),
                '#' => self.lex_hash()?,
                '0'..='9' => self.lex_number()?,
                '+' | '-'
                    if self
                        .tracker
                        .peek_second()
                        .map(|c| c.is_ascii_digit())
                        .unwrap_or_default() =>
                {
                    self.lex_number()?
                }
                c if is_ident_begin(c) => self.lex_identifier(),
                c => {
                    self.tracker.save_jump();
                    let span = self.tracker.pop_span();
                    tracing::debug!(%span, ?c, "invalid character");
                    return Err(LexError::InvalidChar { ch: c, span });
                }
            }
        }

        Ok(self.tokens)
    }
}

/// Lexes a whole source text.
pub fn lex(source: &str) -> Result<Vec<Token<'_>>> {
    Lexer::new(source).lex()
}
