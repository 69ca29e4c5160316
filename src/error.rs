use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Process exit code for runtime failures.
pub const EXIT_RUNTIME: i32 = -1;
/// Process exit code for configuration errors.
pub const EXIT_CONFIG: i32 = -2;

/// Errors surfaced by the extraction pipeline.
///
/// Configuration problems are detected before the worker group starts any
/// work and map to [`EXIT_CONFIG`]; everything else aborts the worker that
/// hit it and maps to [`EXIT_RUNTIME`]. Soft limits (overlong hit IDs,
/// surplus length predicates, blank table lines) are not errors; they are
/// logged and processing continues.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid command line option or option combination.
    #[error("config error: {0}")]
    Config(String),

    /// I/O failure with the path it happened on.
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// I/O failure without useful path context.
    #[error(transparent)]
    RawIo(#[from] io::Error),

    /// An input file turned out to be empty.
    #[error("{} is empty", .0.display())]
    EmptyInput(PathBuf),

    /// A non-first window contained no record start; a single record is
    /// larger than the window size.
    #[error("no record start in window {window} at file offset {offset}")]
    RecordTooLarge { window: u64, offset: u64 },

    /// A mode that is accepted by the configuration but not implemented.
    #[error("{0}")]
    Unsupported(String),

    /// A peer in the worker group went away mid-operation.
    #[error("group transport failure: {0}")]
    Comm(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Exit code the process should terminate with for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) => EXIT_CONFIG,
            _ => EXIT_RUNTIME,
        }
    }
}
