//! Error types for the reconcile crate

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reconciling a host
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed item declaration, rejected at registration time
    #[error("{0}")]
    Registration(String),

    /// A file referenced a user name the host does not know
    #[error("unknown user {0:?}")]
    UnknownUser(String),

    /// A file referenced a group name the host does not know
    #[error("unknown group {0:?}")]
    UnknownGroup(String),

    /// Template rendering failed
    #[error("template: {0}")]
    Template(String),

    /// A command exited non-zero
    #[error("{command} exited {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    /// An argument could not be represented on a shell command line
    #[error("unquotable command argument {0:?}")]
    Argv(String),

    /// SSH transport failure
    #[error("ssh: {0}")]
    Ssh(#[from] ssh2::Error),

    /// Filesystem operation failed
    #[error("{}: {err}", path.display())]
    Path {
        path: PathBuf,
        #[source]
        err: std::io::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An account database line could not be parsed
    #[error("{file} line {line}: {reason}")]
    Parse {
        file: &'static str,
        line: usize,
        reason: String,
    },

    /// The run was cancelled by the operator
    #[error("cancelled")]
    Cancelled,

    /// An item failed; carries the source location it was registered from
    #[error("{location} {cause}")]
    Item {
        location: String,
        #[source]
        cause: Box<Error>,
    },
}

impl Error {
    /// Whether this error (or the item error it wraps) is an operator abort.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Item { cause, .. } => cause.is_cancelled(),
            _ => false,
        }
    }
}

/// Result type for reconcile operations
pub type Result<T> = std::result::Result<T, Error>;
