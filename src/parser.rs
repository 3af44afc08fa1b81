//! Recursive descent reader. The main function here is the [parse] function that reads a token
//! list into a [Vec<Value>], allocating every tree inside of the [Gc].

use crate::gc::{AllocatorFault, Gc};
use crate::lexer::{Payload, Token, TokenKind};
use crate::location::Span;
use crate::tree::{SpecialForm, Tree, Value};

#[derive(thiserror::Error, miette::Diagnostic, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("unexpected {kind}")]
    #[diagnostic(code(nisc::parse::unexpected_token))]
    UnexpectedToken {
        kind: TokenKind,
        #[label("unexpected token")]
        span: Span,
    },

    #[error("unexpected end of file")]
    #[diagnostic(code(nisc::parse::unexpected_eof))]
    UnexpectedEof {
        #[label("this form is never closed")]
        span: Span,
    },

    #[error("{value} does not fit in a byte")]
    #[diagnostic(code(nisc::parse::byte_out_of_range))]
    ByteOutOfRange {
        value: i64,
        #[label("expected a number from 0 to 255")]
        span: Span,
    },

    #[error("forms nest deeper than {limit} levels")]
    #[diagnostic(code(nisc::parse::too_deep))]
    TooDeep {
        limit: usize,
        #[label("this form is too deep")]
        span: Span,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Fault(#[from] AllocatorFault),
}

/// How many lists, vectors and shorthands may be open at once.
pub const MAX_DEPTH: usize = 512;

pub type Result<T, E = ParseError> = std::result::Result<T, E>;

/// The outcome of a read that failed somewhere. The forms that were read before and after the
/// failures are kept, but they must not be trusted.
#[derive(thiserror::Error, Debug)]
#[error("{} errors while reading", .errors.len())]
pub struct ReadFailure {
    pub forms: Vec<Value>,
    pub errors: Vec<ParseError>,
}

/// Reads tokens left to right with a single token of lookahead.
pub struct Reader<'r, 'src> {
    gc: &'r mut Gc,
    tokens: &'r [Token<'src>],
    index: usize,
    depth: usize,
}

impl<'r, 'src> Reader<'r, 'src> {
    pub fn new(gc: &'r mut Gc, tokens: &'r [Token<'src>]) -> Self {
        Self {
            gc,
            tokens,
            index: 0,
            depth: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.index >= self.tokens.len()
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.tokens.get(self.index).map(|token| token.kind)
    }

    fn bump(&mut self) -> Option<Token<'src>> {
        let token = self.tokens.get(self.index).copied()?;
        self.index += 1;
        Some(token)
    }

    /// The span of the last consumed token.
    fn last_span(&self) -> Span {
        self.index
            .checked_sub(1)
            .and_then(|index| self.tokens.get(index))
            .map(|token| token.span)
            .unwrap_or_default()
    }

    fn expect(&mut self, kind: TokenKind, open: Span) -> Result<Token<'src>> {
        match self.bump() {
            Some(token) if token.kind == kind => Ok(token),
            Some(token) => Err(ParseError::UnexpectedToken {
                kind: token.kind,
                span: token.span,
            }),
            None => Err(ParseError::UnexpectedEof { span: open }),
        }
    }

    /// Reads a single datum.
    pub fn read_one(&mut self) -> Result<Value> {
        let Some(token) = self.bump() else {
            return Err(ParseError::UnexpectedEof {
                span: self.last_span(),
            });
        };

        match token.payload {
            Payload::Ident(text) => match SpecialForm::from_keyword(text) {
                Some(form) => Ok(form.into()),
                None => {
                    let atom = self.gc.atom(text)?;
                    self.gc.set_span(atom, token.span);
                    Ok(atom.into())
                }
            },
            Payload::Int(value) => Ok(Value::Int(value)),
            Payload::Float(value) => Ok(Value::Float(value)),
            Payload::Bool(value) => Ok(value.into()),
            Payload::Char(value) => Ok(Value::Int(value as i64)),
            Payload::None => {
                if self.depth == MAX_DEPTH {
                    return Err(ParseError::TooDeep {
                        limit: MAX_DEPTH,
                        span: token.span,
                    });
                }

                self.depth += 1;
                let value = self.read_compound(token);
                self.depth -= 1;

                value
            }
        }
    }

    fn read_compound(&mut self, token: Token<'src>) -> Result<Value> {
        match token.kind {
            TokenKind::ParenL => self.read_list(token.span),
            TokenKind::VectorL => self.read_vector(token.span),
            TokenKind::U8ParenL => self.read_byte_vector(token.span),
            TokenKind::SingleQuote => self.read_shorthand(SpecialForm::Quote, token.span),
            TokenKind::Backtick => self.read_shorthand(SpecialForm::Quasiquote, token.span),
            TokenKind::Comma => self.read_shorthand(SpecialForm::Unquote, token.span),
            TokenKind::CommaAt => self.read_shorthand(SpecialForm::UnquoteSplicing, token.span),
            kind => Err(ParseError::UnexpectedToken {
                kind,
                span: token.span,
            }),
        }
    }

    /// Reads the rest of a list, after its `(`. The list grows by patching the tail of its last
    /// pair, and a `. datum` right before the `)` becomes the improper tail.
    fn read_list(&mut self, open: Span) -> Result<Value> {
        let nil = self.gc.nil();

        if self.peek_kind() == Some(TokenKind::ParenR) {
            self.index += 1;
            return Ok(nil.into());
        }

        let first = self.read_one()?;
        let head = self.gc.pair(first, nil.into())?;
        let mut tail = head;

        loop {
            match self.peek_kind() {
                None => return Err(ParseError::UnexpectedEof { span: open }),
                Some(TokenKind::ParenR) => {
                    self.index += 1;
                    break;
                }
                Some(TokenKind::Dot) => {
                    self.index += 1;
                    let last = self.read_one()?;
                    let last = self.gc.value_to_tree(last)?;
                    self.gc.set_cdr(tail, last)?;
                    self.expect(TokenKind::ParenR, open)?;
                    break;
                }
                Some(_) => {
                    let item = self.read_one()?;
                    let pair = self.gc.pair(item, nil.into())?;
                    self.gc.set_cdr(tail, pair)?;
                    tail = pair;
                }
            }
        }

        self.gc.set_span(head, open.to(self.last_span()));

        Ok(head.into())
    }

    fn read_vector(&mut self, open: Span) -> Result<Value> {
        let vector = self.gc.vector(&[])?;

        loop {
            match self.peek_kind() {
                None => return Err(ParseError::UnexpectedEof { span: open }),
                Some(TokenKind::ParenR) => {
                    self.index += 1;
                    break;
                }
                Some(_) => {
                    let item = self.read_one()?;
                    self.gc.vector_push(vector, item)?;
                }
            }
        }

        self.gc.set_span(vector, open.to(self.last_span()));

        Ok(vector.into())
    }

    fn read_byte_vector(&mut self, open: Span) -> Result<Value> {
        let vector = self.gc.byte_vector(&[])?;

        loop {
            let Some(token) = self.bump() else {
                return Err(ParseError::UnexpectedEof { span: open });
            };

            match (token.kind, token.payload) {
                (TokenKind::ParenR, _) => break,
                (_, Payload::Int(value)) => {
                    let byte = u8::try_from(value).map_err(|_| ParseError::ByteOutOfRange {
                        value,
                        span: token.span,
                    })?;
                    self.gc.byte_vector_push(vector, byte)?;
                }
                (kind, _) => {
                    return Err(ParseError::UnexpectedToken {
                        kind,
                        span: token.span,
                    })
                }
            }
        }

        self.gc.set_span(vector, open.to(self.last_span()));

        Ok(vector.into())
    }

    /// `'x`, `` `x ``, `,x` and `,@x` read as two element lists headed by the special form.
    fn read_shorthand(&mut self, form: SpecialForm, open: Span) -> Result<Value> {
        if self.is_done() {
            return Err(ParseError::UnexpectedEof { span: open });
        }

        let item = self.read_one()?;
        let list = self.gc.list(&[form.into(), item])?;
        self.gc.set_span(list, open.to(self.last_span()));

        Ok(list.into())
    }

    /// Skips what is left of the top level form that started at `start`, so the next read starts
    /// at a fresh form.
    fn recover(&mut self, start: usize) {
        let mut depth = 0usize;
        let mut end = self.tokens.len();

        for (index, token) in self.tokens.iter().enumerate().skip(start) {
            match token.kind {
                TokenKind::ParenL | TokenKind::VectorL | TokenKind::U8ParenL => depth += 1,
                TokenKind::ParenR => depth = depth.saturating_sub(1),
                TokenKind::SingleQuote
                | TokenKind::Backtick
                | TokenKind::Comma
                | TokenKind::CommaAt => continue,
                _ => {}
            }

            if depth == 0 {
                end = index + 1;
                break;
            }
        }

        self.index = self.index.max(end);
    }

    /// Reads every top level form. A form that fails is reported and skipped, and reading goes on
    /// with the next one, unless the arena itself failed.
    pub fn read_all(&mut self) -> (Vec<Value>, Vec<ParseError>) {
        let mut forms = vec![];
        let mut errors = vec![];

        while !self.is_done() {
            let start = self.index;

            match self.read_one() {
                Ok(form) => forms.push(form),
                Err(error @ ParseError::Fault(_)) => {
                    errors.push(error);
                    break;
                }
                Err(error) => {
                    tracing::debug!(%error, "skipping form");
                    errors.push(error);
                    self.recover(start);
                }
            }
        }

        (forms, errors)
    }
}

/// Reads a token list into top level forms.
pub fn parse(gc: &mut Gc, tokens: &[Token]) -> Result<Vec<Value>, ReadFailure> {
    let (forms, errors) = Reader::new(gc, tokens).read_all();

    if errors.is_empty() {
        Ok(forms)
    } else {
        Err(ReadFailure { forms, errors })
    }
}

/// The tree behind a value, if there is one.
pub fn as_tree(value: Value) -> Option<Tree> {
    match value {
        Value::Tree(tree) => Some(tree),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use crate::lexer::lex;
    use crate::tree::Stree;

    use super::*;

    fn read(gc: &mut Gc, source: &str) -> Result<Vec<Value>, ReadFailure> {
        let tokens = lex(source).unwrap();
        parse(gc, &tokens)
    }

    fn show(gc: &Gc, forms: &[Value]) -> Vec<String> {
        forms.iter().map(|form| gc.display(*form).to_string()).collect()
    }

    fn gc() -> Gc {
        Gc::new(64 * 1024).unwrap()
    }

    #[test]
    fn reads_a_call() {
        let mut gc = gc();
        let forms = read(&mut gc, "(+ 1 2)").unwrap();

        assert_eq!(forms.len(), 1);
        let list = as_tree(forms[0]).unwrap();

        let Stree::Pair { car, cdr } = gc.node(list) else {
            panic!("expected a pair");
        };
        assert_eq!(gc.node(car), Stree::Atom("+"));
        assert!(gc.is_list(cdr));
        assert_eq!(gc.display(cdr).to_string(), "(1 2)");
        assert_eq!(gc.span(list), Span::new(0, 7));
        assert_eq!(gc.span(car), Span::new(1, 1));
    }

    #[test]
    fn reads_immediates() {
        let mut gc = gc();
        let forms = read(&mut gc, r"1 -2.5 #t #f #\a").unwrap();

        assert_eq!(
            forms,
            vec![
                Value::Int(1),
                Value::Float(-2.5),
                Value::True,
                Value::False,
                Value::Int('a' as i64),
            ]
        );
    }

    #[test]
    fn reads_shorthands() {
        let mut gc = gc();
        let forms = read(&mut gc, "'foo ,@x `(a ,b)").unwrap();

        assert_eq!(
            show(&gc, &forms),
            vec![
                "(quote foo)",
                "(unquote-splicing x)",
                "(quasiquote (a (unquote b)))"
            ]
        );

        let quote = as_tree(forms[0]).unwrap();
        assert_eq!(gc.list_length(quote), Some(2));
        assert_eq!(
            gc.tree_to_value(gc.car(quote).unwrap()),
            Value::Special(SpecialForm::Quote)
        );
    }

    #[test]
    fn reads_dotted_lists() {
        let mut gc = gc();
        let forms = read(&mut gc, "(a . b) (a b . c) (a . (b))").unwrap();

        assert_eq!(show(&gc, &forms), vec!["(a . b)", "(a b . c)", "(a b)"]);
        assert!(!gc.value_is_list(forms[0]));
        assert!(gc.value_is_list(forms[2]));
    }

    #[test]
    fn empty_list_is_nil() {
        let mut gc = gc();
        let forms = read(&mut gc, "()").unwrap();

        assert_eq!(forms, vec![Value::Tree(gc.nil())]);
    }

    #[test]
    fn reserved_words_are_not_atoms() {
        let mut gc = gc();
        let forms = read(&mut gc, "if (lambda (x) x)").unwrap();

        assert_eq!(forms[0], Value::Special(SpecialForm::If));

        let lambda = as_tree(forms[1]).unwrap();
        assert_eq!(
            gc.node(gc.car(lambda).unwrap()),
            Stree::Special(SpecialForm::Lambda)
        );
        assert_eq!(gc.display(lambda).to_string(), "(lambda (x) x)");
    }

    #[test]
    fn reads_vectors() {
        let mut gc = gc();
        let forms = read(&mut gc, "#(1 (a) #t) #u8(0 1 255) #()").unwrap();

        assert_eq!(show(&gc, &forms), vec!["#(1 (a) #t)", "#u8(0 1 255)", "#()"]);
    }

    #[test]
    fn rejects_bytes_out_of_range() {
        let mut gc = gc();
        let failure = read(&mut gc, "#u8(1 256)").unwrap_err();

        assert_eq!(
            failure.errors,
            vec![ParseError::ByteOutOfRange {
                value: 256,
                span: Span::new(6, 3)
            }]
        );
    }

    #[test]
    fn keeps_reading_after_an_error() {
        let mut gc = gc();
        let failure = read(&mut gc, ") (a [ b) (c d)").unwrap_err();

        assert_eq!(
            failure.errors,
            vec![
                ParseError::UnexpectedToken {
                    kind: TokenKind::ParenR,
                    span: Span::new(0, 1)
                },
                ParseError::UnexpectedToken {
                    kind: TokenKind::SquareL,
                    span: Span::new(5, 1)
                },
            ]
        );
        assert_eq!(show(&gc, &failure.forms), vec!["(c d)"]);
        assert_eq!(failure.errors[0].to_string(), "unexpected `)`");
    }

    #[test]
    fn deep_nesting_is_an_error() {
        let mut gc = gc();

        let deepest = format!("{}{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert_eq!(read(&mut gc, &deepest).unwrap().len(), 1);

        let source = format!("{}{} (+ 1 2)", "(".repeat(600), ")".repeat(600));
        let failure = read(&mut gc, &source).unwrap_err();

        assert_eq!(
            failure.errors,
            vec![ParseError::TooDeep {
                limit: MAX_DEPTH,
                span: Span::new(MAX_DEPTH, 1)
            }]
        );
        assert_eq!(show(&gc, &failure.forms), vec!["(+ 1 2)"]);
    }

    #[test]
    fn dotted_tail_must_close_the_list() {
        let mut gc = gc();
        let failure = read(&mut gc, "(a . b c)").unwrap_err();

        assert_eq!(
            failure.errors,
            vec![ParseError::UnexpectedToken {
                kind: TokenKind::Ident,
                span: Span::new(7, 1)
            }]
        );
    }

    #[test]
    fn unclosed_lists_point_at_their_opening() {
        let mut gc = gc();
        let failure = read(&mut gc, "(a (b c)").unwrap_err();

        assert_eq!(
            failure.errors,
            vec![ParseError::UnexpectedEof {
                span: Span::new(0, 1)
            }]
        );
        assert!(failure.forms.is_empty());
    }

    #[test]
    fn arena_faults_stop_the_reader() {
        let mut gc = Gc::new(256).unwrap();
        let failure = read(&mut gc, "(a b c d e f g h) (i)").unwrap_err();

        assert!(matches!(
            failure.errors.as_slice(),
            [ParseError::Fault(AllocatorFault::OutOfMemory { .. })]
        ));
    }
}
