//! High level bytecode. It's a register based three address code where every register is written
//! by exactly one instruction. A [Program] is produced by a [builder::Builder] and is never
//! mutated afterwards.

use std::fmt::{self, Display};

use crate::tree::Value;
use crate::util::bool_enum;

pub mod builder;
pub mod display;
pub mod prelude;
pub mod verify;

pub use builder::Builder;
pub use verify::VerifyError;

macro_rules! define_opcodes {
    ($($name:ident => $text:literal),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $($name),*
        }

        impl Opcode {
            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$name => $text),*
                }
            }
        }
    };
}

define_opcodes! {
    Alloca => "alloca",
    Load => "load",
    Store => "store",
    LoadU8 => "load-u8",
    LoadU16 => "load-u16",
    LoadU32 => "load-u32",
    LoadU64 => "load-u64",
    StoreU8 => "store-u8",
    StoreU16 => "store-u16",
    StoreU32 => "store-u32",
    StoreU64 => "store-u64",

    Call => "call",
    Return => "return",
    Br => "br",
    CondBr => "cond-br",
    Phi => "phi",

    Cmp => "cmp",
    Fcmp => "fcmp",

    Add => "add",
    Sub => "sub",
    Mul => "mul",
    Imul => "imul",
    Div => "div",
    Idiv => "idiv",
    Rem => "rem",
    Irem => "irem",

    Xor => "xor",
    Or => "or",
    And => "and",
    Shll => "shll",
    Shrl => "shrl",
    Shra => "shra",

    Fadd => "fadd",
    Fsub => "fsub",
    Fmul => "fmul",
    Fdiv => "fdiv",
    Frem => "frem",

    Car => "car",
    Cdr => "cdr",
    Cons => "cons",
}

impl Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A virtual register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reg(pub u32);

impl Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    /// An immediate.
    Value(Value),

    /// The result of an earlier instruction.
    Register(Reg),

    /// A positional parameter of the enclosing function.
    Proper(u32),
}

impl Operand {
    pub fn register(self) -> Option<Reg> {
        match self {
            Operand::Register(reg) => Some(reg),
            _ => None,
        }
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Value(value)
    }
}

impl From<Reg> for Operand {
    fn from(reg: Reg) -> Self {
        Operand::Register(reg)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub target: Option<Reg>,
    pub operands: Vec<Operand>,
}

bool_enum!(Present);

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,

    /// Removed functions keep their slot, but can't be found by name anymore.
    pub present: Present,
    pub instructions: Vec<Instruction>,
}

impl Function {
    pub fn is_present(&self) -> bool {
        self.present == Present::Yes
    }
}

/// Index of a function in the function table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunRef(pub usize);

impl FunRef {
    pub fn index(self) -> usize {
        self.0
    }
}

/// The finished function table and its entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    functions: Box<[Function]>,
    entry: Option<FunRef>,
}

impl Program {
    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn function(&self, function: FunRef) -> Option<&Function> {
        self.functions.get(function.index())
    }

    pub fn entry(&self) -> Option<FunRef> {
        self.entry
    }

    /// First present function called `name`.
    pub fn find(&self, name: &str) -> Option<FunRef> {
        self.functions
            .iter()
            .position(|function| function.is_present() && function.name == name)
            .map(FunRef)
    }
}
