//! Reserved words of the reader. They are recognised by their exact text and never become atoms.

use std::fmt::Display;

macro_rules! special_forms {
    ($($name:ident => $keyword:literal),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum SpecialForm {
            $($name),*
        }

        impl SpecialForm {
            /// Every special form, in discriminant order.
            pub const ALL: &'static [SpecialForm] = &[$(SpecialForm::$name),*];

            pub fn keyword(self) -> &'static str {
                match self {
                    $(SpecialForm::$name => $keyword),*
                }
            }

            pub fn from_keyword(text: &str) -> Option<SpecialForm> {
                match text {
                    $($keyword => Some(SpecialForm::$name),)*
                    _ => None,
                }
            }
        }
    };
}

special_forms! {
    Lambda => "lambda",
    If => "if",
    Set => "set!",
    Include => "include",
    IncludeCi => "include-ci",
    Cond => "cond",
    Case => "case",
    Else => "else",
    And => "and",
    Or => "or",
    Unless => "unless",
    CondExpand => "cond-expand",
    Let => "let",
    LetStar => "let*",
    Letrec => "letrec",
    LetrecStar => "letrec*",
    LetValues => "let-values",
    LetStarValues => "let*-values",
    Begin => "begin",
    Do => "do",
    Delay => "delay",
    DelayForce => "delay-force",
    Force => "force",
    MakePromise => "make-promise",
    MakeParameter => "make-parameter",
    Parameterize => "parameterize",
    Guard => "guard",
    Quote => "quote",
    Quasiquote => "quasiquote",
    Unquote => "unquote",
    UnquoteSplicing => "unquote-splicing",
    CaseLambda => "case-lambda",
    LetSyntax => "let-syntax",
    LetrecSyntax => "letrec-syntax",
    SyntaxRules => "syntax-rules",
    SyntaxError => "syntax-error",
}

impl SpecialForm {
    pub(crate) fn id(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_id(id: u8) -> Option<SpecialForm> {
        SpecialForm::ALL.get(id as usize).copied()
    }
}

impl Display for SpecialForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.keyword())
    }
}
