//! Public error taxonomy
//!
//! Every failure that crosses the crate boundary is an [`Error`]. Its
//! [`ErrorKind`] is a closed set; its message is `"<kind>: <detail>"`.

use std::fmt;

use crate::parser::DecodeError;
use crate::runtime::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The bytes are not a well-formed, valid module
    CompileError,
    /// An import is missing, duplicated or of the wrong type; or an export is unknown
    LinkError,
    /// Instance memory or tables could not be allocated
    ResourceError,
    /// Guest execution aborted
    RuntimeTrap,
    /// Arguments or result slots do not fit the export's signature
    SignatureMismatch,
    /// The host could not read its input
    IoError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::CompileError => "CompileError",
            ErrorKind::LinkError => "LinkError",
            ErrorKind::ResourceError => "ResourceError",
            ErrorKind::RuntimeTrap => "RuntimeTrap",
            ErrorKind::SignatureMismatch => "SignatureMismatch",
            ErrorKind::IoError => "IoError",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("compile error: {0}")]
    Compile(#[from] DecodeError),

    #[error("link error: {0}")]
    Link(String),

    #[error("resource error: {0}")]
    Resource(RuntimeError),

    #[error("runtime trap: {0}")]
    Trap(RuntimeError),

    #[error("signature mismatch: {0}")]
    SignatureMismatch(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Compile(_) => ErrorKind::CompileError,
            Error::Link(_) => ErrorKind::LinkError,
            Error::Resource(_) => ErrorKind::ResourceError,
            Error::Trap(_) => ErrorKind::RuntimeTrap,
            Error::SignatureMismatch(_) => ErrorKind::SignatureMismatch,
            Error::Io(_) => ErrorKind::IoError,
        }
    }
}

impl From<RuntimeError> for Error {
    fn from(error: RuntimeError) -> Self {
        if error.is_resource() {
            Error::Resource(error)
        } else {
            Error::Trap(error)
        }
    }
}
