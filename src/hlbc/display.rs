//! Disassembler. Every function prints as `(define (name) ...)` with one `(opcode @target
//! operands...)` line per instruction. Registers print as `%n`, and proper arguments count down
//! from `%-1`.

use std::fmt::{self, Display, Formatter};

use crate::gc::Gc;

use super::{Function, Instruction, Operand, Program};

pub struct DisplayedProgram<'p> {
    program: &'p Program,
    gc: &'p Gc,
}

impl Program {
    /// The arena is needed to print tree immediates.
    pub fn display<'p>(&'p self, gc: &'p Gc) -> DisplayedProgram<'p> {
        DisplayedProgram { program: self, gc }
    }
}

fn write_operand(gc: &Gc, operand: &Operand, f: &mut Formatter<'_>) -> fmt::Result {
    match operand {
        Operand::Value(value) => write!(f, "{}", gc.display(*value)),
        Operand::Register(reg) => write!(f, "{reg}"),
        Operand::Proper(index) => write!(f, "%{}", -1 - i64::from(*index)),
    }
}

fn write_instruction(gc: &Gc, instruction: &Instruction, f: &mut Formatter<'_>) -> fmt::Result {
    write!(f, "({}", instruction.opcode)?;

    if let Some(target) = instruction.target {
        write!(f, " @{}", target.0)?;
    }

    for operand in &instruction.operands {
        f.write_str(" ")?;
        write_operand(gc, operand, f)?;
    }

    f.write_str(")")
}

fn write_function(gc: &Gc, function: &Function, f: &mut Formatter<'_>) -> fmt::Result {
    write!(f, "(define ({})", function.name)?;

    for instruction in &function.instructions {
        f.write_str("\n  ")?;
        write_instruction(gc, instruction, f)?;
    }

    f.write_str(")")
}

impl Display for DisplayedProgram<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let functions = self
            .program
            .functions()
            .iter()
            .filter(|function| function.is_present());

        for (index, function) in functions.enumerate() {
            if index > 0 {
                f.write_str("\n\n")?;
            }
            write_function(self.gc, function, f)?;
        }

        if self.program.functions().iter().any(Function::is_present) {
            f.write_str("\n")?;
        }

        Ok(())
    }
}
