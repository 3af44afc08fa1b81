//! Printer for values and trees. Proper lists print as `(a b c)`, improper ones as `(a b . c)`.

use std::fmt::{self, Display, Formatter};

use crate::gc::Gc;

use super::{Stree, Tree, Value};

/// A value together with the arena that owns its nodes, so it can be printed.
pub struct Displayed<'gc> {
    gc: &'gc Gc,
    value: Value,
}

impl Gc {
    pub fn display(&self, value: impl Into<Value>) -> Displayed<'_> {
        Displayed {
            gc: self,
            value: value.into(),
        }
    }
}

impl Display for Displayed<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.value {
            Value::False => f.write_str("#f"),
            Value::True => f.write_str("#t"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value:?}"),
            Value::Special(form) => write!(f, "{form}"),
            Value::Tree(tree) => write_tree(self.gc, tree, f),
        }
    }
}

fn write_tree(gc: &Gc, tree: Tree, f: &mut Formatter<'_>) -> fmt::Result {
    match gc.node(tree) {
        Stree::False => f.write_str("#f"),
        Stree::True => f.write_str("#t"),
        Stree::Int(value) => write!(f, "{value}"),
        Stree::Float(value) => write!(f, "{value:?}"),
        Stree::Nil => f.write_str("()"),
        Stree::Atom(text) => f.write_str(text),
        Stree::Special(form) => write!(f, "{form}"),
        Stree::Vector(items) => {
            f.write_str("#(")?;
            for (index, item) in items.enumerate() {
                if index > 0 {
                    f.write_str(" ")?;
                }
                write_tree(gc, item, f)?;
            }
            f.write_str(")")
        }
        Stree::ByteVector(bytes) => {
            f.write_str("#u8(")?;
            for (index, byte) in bytes.iter().enumerate() {
                if index > 0 {
                    f.write_str(" ")?;
                }
                write!(f, "{byte}")?;
            }
            f.write_str(")")
        }
        Stree::Pair { car, mut cdr } => {
            f.write_str("(")?;
            write_tree(gc, car, f)?;

            loop {
                match gc.node(cdr) {
                    Stree::Nil => break,
                    Stree::Pair { car, cdr: next } => {
                        f.write_str(" ")?;
                        write_tree(gc, car, f)?;
                        cdr = next;
                    }
                    _ => {
                        f.write_str(" . ")?;
                        write_tree(gc, cdr, f)?;
                        break;
                    }
                }
            }

            f.write_str(")")
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::tree::SpecialForm;

    use super::*;

    #[test]
    fn prints_immediates() {
        let gc = Gc::new(4096).unwrap();

        assert_eq!(gc.display(Value::True).to_string(), "#t");
        assert_eq!(gc.display(Value::False).to_string(), "#f");
        assert_eq!(gc.display(Value::Int(-12)).to_string(), "-12");
        assert_eq!(gc.display(Value::Float(2.0)).to_string(), "2.0");
        assert_eq!(gc.display(Value::Float(-0.25)).to_string(), "-0.25");
        assert_eq!(gc.display(SpecialForm::Lambda).to_string(), "lambda");
        assert_eq!(gc.display(gc.nil()).to_string(), "()");
    }

    #[test]
    fn prints_lists() {
        let mut gc = Gc::new(4096).unwrap();

        let a = gc.atom("a").unwrap();
        let inner = gc.list(&[Value::Int(1), Value::True]).unwrap();
        let list = gc.list(&[a.into(), inner.into(), Value::Float(1.5)]).unwrap();
        assert_eq!(gc.display(list).to_string(), "(a (1 #t) 1.5)");

        let dotted = gc.pair(Value::Int(2), Value::Int(3)).unwrap();
        let dotted = gc.pair(a.into(), dotted.into()).unwrap();
        assert_eq!(gc.display(dotted).to_string(), "(a 2 . 3)");
    }

    #[test]
    fn prints_vectors() {
        let mut gc = Gc::new(4096).unwrap();

        let empty = gc.vector(&[]).unwrap();
        let vector = gc.vector(&[Value::Int(1), empty.into()]).unwrap();
        let bytes = gc.byte_vector(&[0, 7, 255]).unwrap();

        assert_eq!(gc.display(vector).to_string(), "#(1 #())");
        assert_eq!(gc.display(bytes).to_string(), "#u8(0 7 255)");
    }
}
