//! Lowering from read forms to bytecode. Calls to functions of the table become `call`
//! instructions, literals become immediates, and everything else is reported as unsupported
//! instead of being guessed at.

use std::fmt::{self, Display};

use crate::gc::{AllocatorFault, Gc};
use crate::hlbc::{Builder, Operand, Program};
use crate::location::Span;
use crate::tree::{SpecialForm, Stree, Tree, Value};

#[derive(thiserror::Error, miette::Diagnostic, Debug, Clone, PartialEq)]
pub enum LowerError {
    #[error("undefined function: {name}")]
    #[diagnostic(code(nisc::lower::undefined_function))]
    UndefinedFunction {
        name: String,
        #[label("no function with this name")]
        span: Span,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Fault(#[from] AllocatorFault),
}

pub type Result<T, E = LowerError> = std::result::Result<T, E>;

/// Every error found while lowering a program.
#[derive(thiserror::Error, Debug)]
#[error("{} errors while lowering", .0.len())]
pub struct LowerFailure(pub Vec<LowerError>);

impl From<AllocatorFault> for LowerFailure {
    fn from(fault: AllocatorFault) -> Self {
        LowerFailure(vec![fault.into()])
    }
}

/// Why a form has no lowering yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    SpecialForm(SpecialForm),
    Vector,
    ImproperList,
    NonAtomHead,
}

impl Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::SpecialForm(form) => write!(f, "special form `{form}`"),
            Reason::Vector => f.write_str("vector"),
            Reason::ImproperList => f.write_str("improper list"),
            Reason::NonAtomHead => f.write_str("application of a non atom"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unsupported {
    pub reason: Reason,
    pub span: Span,
}

/// What a single expression lowered to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lowered {
    Operand(Operand),
    Unsupported(Unsupported),
}

pub struct Lowerer<'gc> {
    gc: &'gc Gc,
    builder: Builder,
}

impl<'gc> Lowerer<'gc> {
    pub fn new(gc: &'gc Gc, builder: Builder) -> Self {
        Self { gc, builder }
    }

    pub fn builder(&mut self) -> &mut Builder {
        &mut self.builder
    }

    fn unsupported(&self, reason: Reason, tree: Option<Tree>) -> Lowered {
        let span = tree.map(|tree| self.gc.span(tree)).unwrap_or_default();
        Lowered::Unsupported(Unsupported { reason, span })
    }

    /// Lowers one expression at the builder cursor.
    pub fn lower_value(&mut self, value: Value) -> Result<Lowered> {
        match value {
            Value::Tree(tree) => self.lower_tree(tree),
            Value::Special(form) => Ok(self.unsupported(Reason::SpecialForm(form), None)),
            value => Ok(Lowered::Operand(Operand::Value(value))),
        }
    }

    fn lower_tree(&mut self, tree: Tree) -> Result<Lowered> {
        let gc = self.gc;

        match gc.node(tree) {
            Stree::Pair { .. } if !gc.is_list(tree) => {
                Ok(self.unsupported(Reason::ImproperList, Some(tree)))
            }
            Stree::Pair { car, cdr } => match gc.node(car) {
                Stree::Atom(name) => self.lower_call(name, car, cdr),
                Stree::Special(form) => {
                    Ok(self.unsupported(Reason::SpecialForm(form), Some(tree)))
                }
                _ => Ok(self.unsupported(Reason::NonAtomHead, Some(tree))),
            },
            Stree::Vector(_) => Ok(self.unsupported(Reason::Vector, Some(tree))),
            _ => Ok(Lowered::Operand(Operand::Value(gc.tree_to_value(tree)))),
        }
    }

    /// Emits `call` with the callee index followed by the arguments, lowered left to right.
    fn lower_call(&mut self, name: &str, head: Tree, arguments: Tree) -> Result<Lowered> {
        let gc = self.gc;

        let callee = self.builder.find_function(name).ok_or_else(|| {
            LowerError::UndefinedFunction {
                name: name.to_string(),
                span: gc.span(head),
            }
        })?;

        tracing::debug!(name, callee = callee.index(), "lowering call");

        let mut operands = vec![Operand::Value(Value::Int(callee.index() as i64))];

        for argument in gc.list_items(arguments) {
            match self.lower_value(gc.tree_to_value(argument))? {
                Lowered::Operand(operand) => operands.push(operand),
                unsupported @ Lowered::Unsupported(_) => return Ok(unsupported),
            }
        }

        Ok(Lowered::Operand(self.builder.build_call(operands)?))
    }

    /// Finds every call to an undefined function that lowering `value` would run into, without
    /// emitting anything. Returns whether lowering would get past the value.
    fn scan(&self, value: Value, errors: &mut Vec<LowerError>) -> bool {
        let gc = self.gc;

        let tree = match value {
            Value::Tree(tree) => tree,
            Value::Special(_) => return false,
            _ => return true,
        };

        match gc.node(tree) {
            Stree::Pair { car, cdr } if gc.is_list(tree) => {
                let Stree::Atom(name) = gc.node(car) else {
                    return false;
                };

                if self.builder.find_function(name).is_none() {
                    errors.push(LowerError::UndefinedFunction {
                        name: name.to_string(),
                        span: gc.span(car),
                    });
                }

                gc.list_items(cdr)
                    .all(|argument| self.scan(gc.tree_to_value(argument), errors))
            }
            Stree::Pair { .. } | Stree::Vector(_) => false,
            _ => true,
        }
    }

    /// Lowers every top level form, in order, into a `main` function that returns the value of
    /// the last one, and makes `main` the entry point.
    pub fn lower_program(mut self, forms: &[Value]) -> Result<Program, LowerFailure> {
        let main = self.builder.add_function("main");
        self.builder.set_entry(main);
        self.builder.position_at_end(main)?;

        let mut result = None;

        for (index, form) in forms.iter().enumerate() {
            match self.lower_value(*form) {
                Ok(Lowered::Operand(operand)) => result = Some(operand),
                Ok(Lowered::Unsupported(Unsupported { reason, span })) => {
                    tracing::warn!(%reason, %span, "form is not supported yet");
                    result = None;
                }
                Err(error @ LowerError::UndefinedFunction { .. }) => {
                    let mut errors = vec![];
                    for form in &forms[index..] {
                        self.scan(*form, &mut errors);
                    }

                    if errors.is_empty() {
                        errors.push(error);
                    }

                    return Err(LowerFailure(errors));
                }
                Err(fault) => return Err(LowerFailure(vec![fault])),
            }
        }

        match result {
            Some(operand) => self.builder.build_return(operand)?,
            None => self.builder.build_return_void()?,
        }

        Ok(self.builder.finalize())
    }
}

/// Lowers `forms` against a fresh prelude.
pub fn to_bytecode(gc: &Gc, forms: &[Value]) -> Result<Program, LowerFailure> {
    let builder = Builder::with_prelude()?;
    Lowerer::new(gc, builder).lower_program(forms)
}
