//! AST to bytecode compilation.

mod compile;
mod emit;
mod errors;
mod session;

pub use compile::{compile, compile_main};
pub use errors::CompileError;
pub use session::Session;
