//! Native extension loading.
//!
//! An extension is a shared library exposing one entry point:
//!
//! ```c
//! uint64_t lyra_ext_init(struct Runtime *rt);
//! ```
//!
//! The entry point allocates whatever objects it wants through the
//! runtime and returns the arena slot of its module object plus one, or
//! zero on failure. The library handle stays open for the life of the
//! process.

use std::ffi::CString;

use crate::errors::ExtError;
use crate::runtime::Runtime;
use crate::value::{ObjId, Value};

pub const EXT_ENTRY: &str = "lyra_ext_init";

/// Raw entry point signature extensions implement.
pub type ExtInitFn = unsafe extern "C" fn(*mut Runtime) -> u64;

#[cfg(all(unix, not(target_os = "macos")))]
fn library_name(name: &str) -> String {
    format!("lib{name}.so")
}

#[cfg(target_os = "macos")]
fn library_name(name: &str) -> String {
    format!("lib{name}.dylib")
}

#[cfg(unix)]
pub fn load_extension(rt: &mut Runtime, name: &str) -> Result<Value, ExtError> {
    let file = library_name(name);
    let c_file = CString::new(file).map_err(|_| ExtError::NotFound(name.to_owned()))?;
    let handle = unsafe { libc::dlopen(c_file.as_ptr(), libc::RTLD_NOW) };
    if handle.is_null() {
        return Err(ExtError::NotFound(name.to_owned()));
    }
    let c_entry = CString::new(EXT_ENTRY).map_err(|_| ExtError::NoEntry(name.to_owned()))?;
    let sym = unsafe { libc::dlsym(handle, c_entry.as_ptr()) };
    if sym.is_null() {
        return Err(ExtError::NoEntry(name.to_owned()));
    }
    let init: ExtInitFn = unsafe { std::mem::transmute(sym) };
    let raw = unsafe { init(rt as *mut Runtime) };
    if raw == 0 {
        return Err(ExtError::InitFailed(name.to_owned()));
    }
    let id = ObjId((raw - 1) as usize);
    if rt.obj(id).is_none() {
        return Err(ExtError::InitFailed(name.to_owned()));
    }
    Ok(Value::Obj(id))
}

#[cfg(not(unix))]
pub fn load_extension(_rt: &mut Runtime, name: &str) -> Result<Value, ExtError> {
    Err(ExtError::NotFound(name.to_owned()))
}
