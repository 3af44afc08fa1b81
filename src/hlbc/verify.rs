//! Structural checks over a finished [Program].

use std::collections::HashSet;

use crate::tree::Value;

use super::{Function, Opcode, Operand, Program, Reg};

#[derive(thiserror::Error, miette::Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("in `{function}`, instruction {instruction} reads {register} before it is written")]
    #[diagnostic(code(nisc::verify::undefined_register))]
    UndefinedRegister {
        function: String,
        instruction: usize,
        register: Reg,
    },

    #[error("in `{function}`, instruction {instruction} writes @{} out of order", .register.0)]
    #[diagnostic(code(nisc::verify::stale_target))]
    StaleTarget {
        function: String,
        instruction: usize,
        register: Reg,
    },

    #[error("in `{function}`, instruction {instruction} calls an unknown function")]
    #[diagnostic(code(nisc::verify::unknown_callee))]
    UnknownCallee { function: String, instruction: usize },

    #[error("the entry point is not a present function")]
    #[diagnostic(code(nisc::verify::unknown_entry))]
    UnknownEntry,
}

impl Program {
    /// Checks that every register is read only after the instruction that writes it, that
    /// targets grow inside of each function, and that calls name present functions.
    pub fn verify(&self) -> Result<(), VerifyError> {
        if let Some(entry) = self.entry() {
            if !self.function(entry).is_some_and(Function::is_present) {
                return Err(VerifyError::UnknownEntry);
            }
        }

        for function in self.functions().iter().filter(|function| function.is_present()) {
            self.verify_function(function)?;
        }

        Ok(())
    }

    fn verify_function(&self, function: &Function) -> Result<(), VerifyError> {
        let mut defined = HashSet::new();
        let mut last: Option<Reg> = None;

        for (instruction, code) in function.instructions.iter().enumerate() {
            for operand in &code.operands {
                if let Operand::Register(register) = operand {
                    if !defined.contains(register) {
                        return Err(VerifyError::UndefinedRegister {
                            function: function.name.clone(),
                            instruction,
                            register: *register,
                        });
                    }
                }
            }

            if code.opcode == Opcode::Call && !self.is_callee(code.operands.first()) {
                return Err(VerifyError::UnknownCallee {
                    function: function.name.clone(),
                    instruction,
                });
            }

            if let Some(target) = code.target {
                if last.is_some_and(|last| target <= last) {
                    return Err(VerifyError::StaleTarget {
                        function: function.name.clone(),
                        instruction,
                        register: target,
                    });
                }

                defined.insert(target);
                last = Some(target);
            }
        }

        Ok(())
    }

    fn is_callee(&self, operand: Option<&Operand>) -> bool {
        let Some(Operand::Value(Value::Int(index))) = operand else {
            return false;
        };

        usize::try_from(*index)
            .ok()
            .and_then(|index| self.functions().get(index))
            .is_some_and(Function::is_present)
    }
}

#[cfg(test)]
mod tests {
    use crate::hlbc::{Builder, FunRef};

    use super::*;

    fn int(value: i64) -> Operand {
        Operand::Value(Value::Int(value))
    }

    #[test]
    fn accepts_the_prelude() {
        let builder = Builder::with_prelude().unwrap();
        assert_eq!(builder.finalize().verify(), Ok(()));
    }

    #[test]
    fn rejects_forward_references() {
        let mut builder = Builder::new();
        let main = builder.add_function("main");
        builder.position_at_end(main).unwrap();
        builder.build_return(Operand::Register(Reg(0))).unwrap();

        // Writes %0 after it was already read.
        builder.position_at(main, 1).unwrap();
        builder.build_add(int(1), int(2)).unwrap();

        assert_eq!(
            builder.finalize().verify(),
            Err(VerifyError::UndefinedRegister {
                function: "main".into(),
                instruction: 0,
                register: Reg(0),
            })
        );
    }

    #[test]
    fn rejects_out_of_order_targets() {
        let mut builder = Builder::new();
        let main = builder.add_function("main");
        builder.position_at_end(main).unwrap();
        builder.build_add(int(1), int(2)).unwrap();

        builder.position_at(main, 0).unwrap();
        builder.build_add(int(3), int(4)).unwrap();

        assert_eq!(
            builder.finalize().verify(),
            Err(VerifyError::StaleTarget {
                function: "main".into(),
                instruction: 1,
                register: Reg(0),
            })
        );
    }

    #[test]
    fn rejects_calls_to_removed_functions() {
        let mut builder = Builder::new();
        let gone = builder.add_function("gone");
        let main = builder.add_function("main");
        builder.set_entry(main);
        builder.position_at_end(main).unwrap();
        builder.build_call(vec![int(gone.index() as i64)]).unwrap();
        builder.remove_function(gone).unwrap();

        assert_eq!(
            builder.finalize().verify(),
            Err(VerifyError::UnknownCallee {
                function: "main".into(),
                instruction: 0,
            })
        );
    }

    #[test]
    fn rejects_a_missing_entry() {
        let mut builder = Builder::new();
        builder.set_entry(FunRef(3));

        assert_eq!(builder.finalize().verify(), Err(VerifyError::UnknownEntry));
    }
}
