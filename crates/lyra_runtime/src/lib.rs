//! The Lyra runtime: tagged values, a hybrid refcounted/mark-sweep heap,
//! the stack machine, and the compiled-unit file format.

mod binop;
mod builtins;
mod codefile;
mod errors;
mod ext;
mod gc;
mod machine;
mod object;
mod runtime;
mod value;

pub use binop::render;
pub use builtins::{ArrayPayload, TablePayload};
pub use codefile::{read_code, write_code};
pub use errors::{CodeFileError, ExecError, ExtError};
pub use ext::load_extension;
pub use machine::{call_value, execute, execute_with_env};
pub use object::{
    ClassObj, CodeObj, CustomHooks, FuncObj, GcEvent, HeapObj, IterCursor, NativeFn, ObjKind,
};
pub use runtime::Runtime;
pub use value::{ObjId, Value};
