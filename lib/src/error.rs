use thiserror::Error;

use crate::device::{ControlCode, OsCode};

/// Errors surfaced by topology queries.
///
/// Expected driver signals (buffer too small, not ready, unsupported) never
/// show up here; they are handled inside the query layer and end up as
/// `Ok(None)` when nothing could be resolved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid device path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("opening {path} failed with OS error {code}")]
    Open { path: String, code: OsCode },

    #[error("{control} failed on {path} with OS error {code}")]
    Native {
        path: String,
        control: ControlCode,
        code: OsCode,
    },

    #[error("{control} on {path} needs more than {size} bytes")]
    BufferLimit {
        path: String,
        control: ControlCode,
        size: usize,
    },

    #[error("{structure} truncated: needed {offset} bytes, got {len}")]
    Truncated {
        structure: &'static str,
        offset: usize,
        len: usize,
    },

    #[error("enumerating {what} failed with OS error {code}")]
    Enumeration { what: &'static str, code: OsCode },
}

impl Error {
    pub(crate) fn invalid_path(path: &str, reason: &'static str) -> Self {
        Error::InvalidPath {
            path: path.to_string(),
            reason,
        }
    }

    /// Raw OS error code, when the error came from the OS.
    pub fn os_code(&self) -> Option<OsCode> {
        match self {
            Error::Open { code, .. }
            | Error::Native { code, .. }
            | Error::Enumeration { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
