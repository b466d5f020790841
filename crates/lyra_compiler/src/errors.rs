//! Compilation errors.

use std::fmt;

#[derive(Debug, PartialEq, Eq)]
pub enum CompileError {
    /// The AST breaks a structural rule (bad assignment target, too many
    /// parameters, and the like).
    MalformedAst { what: &'static str, line: u32 },
    /// A jump referenced a label that never got bound; compiler bug or
    /// hand-built stream.
    UnresolvedLabel(u32),
    LoopControlOutsideLoop(u32),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::MalformedAst { what, line } => {
                write!(f, "line {line}: malformed syntax tree: {what}")
            }
            CompileError::UnresolvedLabel(id) => write!(f, "unresolved jump label {id}"),
            CompileError::LoopControlOutsideLoop(line) => {
                write!(f, "line {line}: break or continue outside a loop")
            }
        }
    }
}

impl std::error::Error for CompileError {}
