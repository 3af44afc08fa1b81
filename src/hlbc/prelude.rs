//! The functions every program can call without defining them: the five arithmetic operators.

use super::builder::{Builder, Result};
use super::{Opcode, Operand};

/// Name and opcode of every prelude function, in table order.
pub const PRELUDE: &[(&str, Opcode)] = &[
    ("+", Opcode::Add),
    ("-", Opcode::Sub),
    ("*", Opcode::Imul),
    ("/", Opcode::Idiv),
    ("%", Opcode::Irem),
];

/// Adds `return (op %arg0 %arg1)` for every operator of the [PRELUDE].
pub fn make_prelude(builder: &mut Builder) -> Result<()> {
    for (name, opcode) in PRELUDE {
        let function = builder.add_function(*name);
        builder.position_at(function, 0)?;

        let result = builder.build_value(*opcode, vec![Operand::Proper(0), Operand::Proper(1)])?;
        builder.build_return(result)?;

        builder.clear_position();
    }

    Ok(())
}

impl Builder {
    /// A builder whose function table starts with the prelude.
    pub fn with_prelude() -> Result<Builder> {
        let mut builder = Builder::new();
        make_prelude(&mut builder)?;
        Ok(builder)
    }
}
