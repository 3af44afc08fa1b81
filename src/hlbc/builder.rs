//! The mutable side of the bytecode. Instructions are inserted at a cursor, so they can be
//! appended or placed in the middle of a function, and [Builder::finalize] freezes everything
//! into a [Program].

use crate::gc::AllocatorFault;

use super::{FunRef, Function, Instruction, Opcode, Operand, Present, Program, Reg};

pub type Result<T, E = AllocatorFault> = std::result::Result<T, E>;

/// Where the next instruction goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub function: FunRef,
    pub instruction: usize,
}

/// Builds a [Program]. Registers are numbered by a single counter shared by every function.
#[derive(Debug, Default)]
pub struct Builder {
    regcnt: u32,
    cursor: Option<Cursor>,
    functions: Vec<Function>,
    entry: Option<FunRef>,
}

macro_rules! build_binary {
    ($($name:ident => $opcode:ident),* $(,)?) => {
        $(
            pub fn $name(&mut self, lhs: Operand, rhs: Operand) -> Result<Operand> {
                self.build_value(Opcode::$opcode, vec![lhs, rhs])
            }
        )*
    };
}

macro_rules! build_unary {
    ($($name:ident => $opcode:ident),* $(,)?) => {
        $(
            pub fn $name(&mut self, operand: Operand) -> Result<Operand> {
                self.build_value(Opcode::$opcode, vec![operand])
            }
        )*
    };
}

macro_rules! build_store {
    ($($name:ident => $opcode:ident),* $(,)?) => {
        $(
            pub fn $name(&mut self, pointer: Operand, value: Operand) -> Result<()> {
                self.build_void(Opcode::$opcode, vec![pointer, value])
            }
        )*
    };
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn function(&self, function: FunRef) -> Option<&Function> {
        self.functions.get(function.index())
    }

    pub fn cursor(&self) -> Option<Cursor> {
        self.cursor
    }

    /// Appends an empty function and returns its index.
    pub fn add_function(&mut self, name: impl Into<String>) -> FunRef {
        let name = name.into();
        tracing::trace!(%name, index = self.functions.len(), "added function");

        self.functions.push(Function {
            name,
            present: Present::Yes,
            instructions: vec![],
        });

        FunRef(self.functions.len() - 1)
    }

    /// Drops the instructions of a function and hides it from lookups. The slot itself stays, so
    /// the other indices keep their meaning.
    pub fn remove_function(&mut self, function: FunRef) -> Result<()> {
        let len = self.functions.len();
        let Some(removed) = self.functions.get_mut(function.index()) else {
            return Err(AllocatorFault::IndexOutOfBounds {
                index: function.index(),
                len,
            });
        };

        if !removed.is_present() {
            return Ok(());
        }

        removed.instructions = vec![];
        removed.present = Present::No;

        if self.cursor.map(|cursor| cursor.function) == Some(function) {
            self.cursor = None;
        }

        Ok(())
    }

    pub fn set_entry(&mut self, function: FunRef) {
        self.entry = Some(function);
    }

    /// Moves the cursor before the `instruction`th instruction of `function`.
    pub fn position_at(&mut self, function: FunRef, instruction: usize) -> Result<()> {
        if function.index() >= self.functions.len() {
            return Err(AllocatorFault::IndexOutOfBounds {
                index: function.index(),
                len: self.functions.len(),
            });
        }

        self.cursor = Some(Cursor {
            function,
            instruction,
        });

        Ok(())
    }

    /// Moves the cursor after the last instruction of `function`.
    pub fn position_at_end(&mut self, function: FunRef) -> Result<()> {
        let len = self
            .function(function)
            .map(|function| function.instructions.len())
            .unwrap_or_default();

        self.position_at(function, len)
    }

    pub fn clear_position(&mut self) {
        self.cursor = None;
    }

    /// First present function called `name`.
    pub fn find_function(&self, name: &str) -> Option<FunRef> {
        self.functions
            .iter()
            .position(|function| function.is_present() && function.name == name)
            .map(FunRef)
    }

    /// Checks the cursor and returns the function and the position of the next instruction.
    fn prepare(&self) -> Result<(usize, usize)> {
        let cursor = self.cursor.ok_or(AllocatorFault::NoInsertionPoint)?;

        let function = self.function(cursor.function).ok_or(AllocatorFault::IndexOutOfBounds {
            index: cursor.function.index(),
            len: self.functions.len(),
        })?;

        let len = function.instructions.len();
        if cursor.instruction > len {
            return Err(AllocatorFault::IndexOutOfBounds {
                index: cursor.instruction,
                len,
            });
        }

        Ok((cursor.function.index(), cursor.instruction))
    }

    fn emit(&mut self, (function, position): (usize, usize), instruction: Instruction) {
        tracing::trace!(opcode = %instruction.opcode, function, position, "emitted");

        if let Some(function) = self.functions.get_mut(function) {
            function.instructions.insert(position, instruction);
        }

        if let Some(cursor) = self.cursor.as_mut() {
            cursor.instruction += 1;
        }
    }

    /// Inserts an instruction that writes a fresh register, and returns that register.
    pub fn build_value(&mut self, opcode: Opcode, operands: Vec<Operand>) -> Result<Operand> {
        let at = self.prepare()?;

        let target = Reg(self.regcnt);
        self.regcnt += 1;

        self.emit(
            at,
            Instruction {
                opcode,
                target: Some(target),
                operands,
            },
        );

        Ok(Operand::Register(target))
    }

    /// Inserts an instruction that doesn't produce a value.
    pub fn build_void(&mut self, opcode: Opcode, operands: Vec<Operand>) -> Result<()> {
        let at = self.prepare()?;

        self.emit(
            at,
            Instruction {
                opcode,
                target: None,
                operands,
            },
        );

        Ok(())
    }

    /// Builds a call. The first operand is the callee index, the rest are the arguments.
    pub fn build_call(&mut self, operands: Vec<Operand>) -> Result<Operand> {
        self.build_value(Opcode::Call, operands)
    }

    pub fn build_return(&mut self, value: Operand) -> Result<()> {
        self.build_void(Opcode::Return, vec![value])
    }

    pub fn build_return_void(&mut self) -> Result<()> {
        self.build_void(Opcode::Return, vec![])
    }

    pub fn build_br(&mut self, target: Operand) -> Result<()> {
        self.build_void(Opcode::Br, vec![target])
    }

    pub fn build_cond_br(&mut self, cond: Operand, then: Operand, otherwise: Operand) -> Result<()> {
        self.build_void(Opcode::CondBr, vec![cond, then, otherwise])
    }

    pub fn build_phi(&mut self, incoming: Vec<Operand>) -> Result<Operand> {
        self.build_value(Opcode::Phi, incoming)
    }

    build_binary! {
        build_cmp => Cmp,
        build_fcmp => Fcmp,
        build_add => Add,
        build_sub => Sub,
        build_mul => Mul,
        build_imul => Imul,
        build_div => Div,
        build_idiv => Idiv,
        build_rem => Rem,
        build_irem => Irem,
        build_xor => Xor,
        build_or => Or,
        build_and => And,
        build_shll => Shll,
        build_shrl => Shrl,
        build_shra => Shra,
        build_fadd => Fadd,
        build_fsub => Fsub,
        build_fmul => Fmul,
        build_fdiv => Fdiv,
        build_frem => Frem,
        build_cons => Cons,
    }

    build_unary! {
        build_alloca => Alloca,
        build_load => Load,
        build_load_u8 => LoadU8,
        build_load_u16 => LoadU16,
        build_load_u32 => LoadU32,
        build_load_u64 => LoadU64,
        build_car => Car,
        build_cdr => Cdr,
    }

    build_store! {
        build_store => Store,
        build_store_u8 => StoreU8,
        build_store_u16 => StoreU16,
        build_store_u32 => StoreU32,
        build_store_u64 => StoreU64,
    }

    /// Freezes the function table into a [Program].
    pub fn finalize(self) -> Program {
        Program {
            functions: self.functions.into_boxed_slice(),
            entry: self.entry,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::tree::Value;

    use super::*;

    fn int(value: i64) -> Operand {
        Operand::Value(Value::Int(value))
    }

    #[test]
    fn appends_at_the_cursor() {
        let mut builder = Builder::new();
        let main = builder.add_function("main");
        builder.position_at_end(main).unwrap();

        let sum = builder.build_add(int(1), int(2)).unwrap();
        let product = builder.build_imul(sum, int(3)).unwrap();
        builder.build_return(product).unwrap();

        let function = builder.function(main).unwrap();
        assert_eq!(
            function.instructions,
            vec![
                Instruction {
                    opcode: Opcode::Add,
                    target: Some(Reg(0)),
                    operands: vec![int(1), int(2)],
                },
                Instruction {
                    opcode: Opcode::Imul,
                    target: Some(Reg(1)),
                    operands: vec![Operand::Register(Reg(0)), int(3)],
                },
                Instruction {
                    opcode: Opcode::Return,
                    target: None,
                    operands: vec![Operand::Register(Reg(1))],
                },
            ]
        );
    }

    #[test]
    fn inserts_in_the_middle() {
        let mut builder = Builder::new();
        let main = builder.add_function("main");
        builder.position_at_end(main).unwrap();
        builder.build_return_void().unwrap();

        builder.position_at(main, 0).unwrap();
        builder.build_car(int(1)).unwrap();
        builder.build_cdr(int(2)).unwrap();

        let opcodes = builder
            .function(main)
            .unwrap()
            .instructions
            .iter()
            .map(|instruction| instruction.opcode)
            .collect::<Vec<_>>();
        assert_eq!(opcodes, vec![Opcode::Car, Opcode::Cdr, Opcode::Return]);
        assert_eq!(
            builder.cursor(),
            Some(Cursor {
                function: main,
                instruction: 2
            })
        );
    }

    #[test]
    fn registers_are_global() {
        let mut builder = Builder::new();
        let first = builder.add_function("first");
        let second = builder.add_function("second");

        builder.position_at_end(first).unwrap();
        assert_eq!(builder.build_alloca(int(8)).unwrap(), Operand::Register(Reg(0)));

        builder.position_at_end(second).unwrap();
        assert_eq!(builder.build_alloca(int(8)).unwrap(), Operand::Register(Reg(1)));
    }

    #[test]
    fn cursor_past_the_end_faults() {
        let mut builder = Builder::new();
        let main = builder.add_function("main");
        builder.position_at(main, 1).unwrap();

        assert_eq!(
            builder.build_add(int(1), int(2)),
            Err(AllocatorFault::IndexOutOfBounds { index: 1, len: 0 })
        );

        // The failed build didn't take a register.
        builder.position_at(main, 0).unwrap();
        assert_eq!(builder.build_add(int(1), int(2)), Ok(Operand::Register(Reg(0))));
    }

    #[test]
    fn building_without_a_cursor_faults() {
        let mut builder = Builder::new();
        builder.add_function("main");

        assert_eq!(
            builder.build_return_void(),
            Err(AllocatorFault::NoInsertionPoint)
        );
        assert_eq!(
            builder.position_at(FunRef(1), 0),
            Err(AllocatorFault::IndexOutOfBounds { index: 1, len: 1 })
        );
    }

    #[test]
    fn removed_functions_keep_their_slot() {
        let mut builder = Builder::new();
        let first = builder.add_function("twice");
        let second = builder.add_function("twice");

        builder.position_at_end(first).unwrap();
        builder.build_return_void().unwrap();

        assert_eq!(builder.find_function("twice"), Some(first));

        builder.remove_function(first).unwrap();
        assert_eq!(builder.cursor(), None);
        assert_eq!(builder.find_function("twice"), Some(second));
        assert!(builder.function(first).unwrap().instructions.is_empty());

        // Removing twice is fine, removing past the end isn't.
        builder.remove_function(first).unwrap();
        assert_eq!(
            builder.remove_function(FunRef(2)),
            Err(AllocatorFault::IndexOutOfBounds { index: 2, len: 2 })
        );

        let program = builder.finalize();
        assert_eq!(program.functions().len(), 2);
        assert_eq!(program.find("twice"), Some(second));
    }

    #[test]
    fn call_takes_its_operands() {
        let mut builder = Builder::new();
        let main = builder.add_function("main");
        builder.set_entry(main);
        builder.position_at_end(main).unwrap();

        let operands = vec![int(0), int(1), Operand::Proper(0)];
        let result = builder.build_call(operands.clone()).unwrap();
        builder.build_return(result).unwrap();

        let program = builder.finalize();
        assert_eq!(program.entry(), Some(main));
        assert_eq!(
            program.function(main).unwrap().instructions[0].operands,
            operands
        );
    }
}
