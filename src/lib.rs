//! A small scheme front end. Source text is lexed, read into trees that live inside of an arena
//! ([gc::Gc]), and lowered into a register based bytecode ([hlbc::Program]) that can be
//! verified and printed back.

pub mod error;
pub mod gc;
pub mod hlbc;
pub mod lexer;
pub mod location;
pub mod lower;
pub mod parser;
pub mod pipeline;
pub mod tree;

mod util;

pub use error::NiscError;
pub use pipeline::{compile, Compiled};
