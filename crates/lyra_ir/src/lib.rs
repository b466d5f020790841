//! Shared surface between the compiler and the runtime: the AST input
//! contract, the instruction encoding, and static bytecode analysis.

mod analysis;
mod ast;
mod opcode;

pub use analysis::*;
pub use ast::*;
pub use opcode::*;
