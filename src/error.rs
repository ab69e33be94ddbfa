//! Error taxonomy for process supervision.
//!
//! Every fallible operation returns one of a small closed set of error
//! kinds. Child exit codes are never errors; they are ordinary
//! non-negative integers returned by `wait` and `stop`.

use nix::errno::Errno;
use thiserror::Error;

/// Errors reported by this crate.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A caller precondition was violated. The operation had no effect.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// An allocation-class failure (`ENOMEM` from fork or pipe creation).
    #[error("out of memory")]
    OutOfMemory,

    /// The peer end of a pipe is closed; no more I/O is possible on it.
    /// The affected pipe is destroyed, so repeated calls keep returning
    /// `BrokenPipe` instead of a platform error.
    #[error("broken pipe")]
    BrokenPipe,

    /// A blocking operation did not complete within its timeout. Process
    /// state is unchanged beyond any bytes already transferred.
    #[error("operation timed out")]
    TimedOut,

    /// Any other platform error, carrying the OS error code. The message
    /// resolves through the platform's own error string table.
    #[error("system error: {0}")]
    Os(Errno),
}

impl From<Errno> for Error {
    fn from(errno: Errno) -> Self {
        match errno {
            Errno::EPIPE => Error::BrokenPipe,
            Errno::ETIMEDOUT => Error::TimedOut,
            Errno::ENOMEM => Error::OutOfMemory,
            other => Error::Os(other),
        }
    }
}

/// Result type alias for procbox operations.
pub type Result<T> = std::result::Result<T, Error>;
