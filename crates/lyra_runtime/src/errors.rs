//! Runtime error types.

use std::fmt;

/// Terminal failure of an execution: a raise that no frame caught.
#[derive(Debug)]
pub enum ExecError {
    Uncaught(String),
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecError::Uncaught(msg) => write!(f, "uncaught: {msg}"),
        }
    }
}

impl std::error::Error for ExecError {}

#[derive(Debug)]
pub enum CodeFileError {
    Io(std::io::Error),
    /// Unknown constant type tag.
    BadTag(u32),
    Malformed(&'static str),
}

impl fmt::Display for CodeFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeFileError::Io(e) => write!(f, "io error: {e}"),
            CodeFileError::BadTag(tag) => write!(f, "unknown constant tag {tag}"),
            CodeFileError::Malformed(what) => write!(f, "malformed code file: {what}"),
        }
    }
}

impl std::error::Error for CodeFileError {}

impl From<std::io::Error> for CodeFileError {
    fn from(e: std::io::Error) -> Self {
        CodeFileError::Io(e)
    }
}

#[derive(Debug)]
pub enum ExtError {
    NotFound(String),
    NoEntry(String),
    InitFailed(String),
}

impl fmt::Display for ExtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtError::NotFound(name) => write!(f, "extension library {name} not found"),
            ExtError::NoEntry(name) => write!(f, "extension {name} has no init entry point"),
            ExtError::InitFailed(name) => write!(f, "extension {name} failed to initialize"),
        }
    }
}

impl std::error::Error for ExtError {}
