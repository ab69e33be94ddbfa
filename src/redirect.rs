//! Redirect policy for the child's standard streams.
//!
//! For each stream the caller picks a redirection; setup produces the
//! parent-side pipe end kept by the library (valid only for `Pipe`) and
//! the child-side handle that gets installed onto the stream in the
//! launched process.

use crate::error::{Error, Result};
use crate::pipe::{self, Pipe};
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use serde::{Deserialize, Serialize};
use std::os::unix::io::{FromRawFd, OwnedFd, RawFd};
use std::path::Path;

/// A standard stream of the child process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stream {
    /// Standard input.
    In,
    /// Standard output.
    Out,
    /// Standard error.
    Err,
}

impl Stream {
    pub(crate) fn target_fd(self) -> RawFd {
        match self {
            Stream::In => libc::STDIN_FILENO,
            Stream::Out => libc::STDOUT_FILENO,
            Stream::Err => libc::STDERR_FILENO,
        }
    }
}

/// How a standard stream of the child is redirected.
#[derive(Debug, Default)]
pub enum Redirect {
    /// Connect the stream to a fresh pipe whose parent end is kept by the
    /// library for reading or writing.
    #[default]
    Pipe,
    /// Give the child the parent's own corresponding stream.
    Inherit,
    /// Connect the stream to the null device.
    Discard,
    /// Give the child a duplicate of the named parent stream. As a
    /// special composition, redirecting stderr to `Parent(Stream::Out)`
    /// while stdout is pipe-redirected merges stderr onto the stdout
    /// pipe.
    Parent(Stream),
    /// Give the child this handle. The handle is consumed.
    Handle(OwnedFd),
}

/// Sets up one stream. Returns `(parent end, child end)`; the parent end
/// is the invalid sentinel for everything but `Pipe`. `merge_target` is
/// the child end of the stdout pipe, offered when initializing stderr so
/// `Parent(Stream::Out)` can merge the two streams.
pub(crate) fn setup(
    stream: Stream,
    redirect: Redirect,
    nonblocking: bool,
    merge_target: Option<RawFd>,
) -> Result<(Pipe, OwnedFd)> {
    match redirect {
        Redirect::Pipe => {
            let (read, write) = pipe::pair()?;
            let (parent, child) = match stream {
                Stream::In => (Pipe::from(write), read),
                Stream::Out | Stream::Err => (Pipe::from(read), write),
            };
            if nonblocking {
                parent.set_nonblocking(true)?;
            }
            Ok((parent, child))
        }
        Redirect::Inherit => Ok((Pipe::invalid(), pipe::dup_cloexec(stream.target_fd())?)),
        Redirect::Discard => Ok((Pipe::invalid(), open_null(stream)?)),
        Redirect::Parent(source) => {
            if stream == Stream::Err && source == Stream::Out {
                if let Some(stdout_child) = merge_target {
                    return Ok((Pipe::invalid(), pipe::dup_cloexec(stdout_child)?));
                }
            }
            Ok((Pipe::invalid(), pipe::dup_cloexec(source.target_fd())?))
        }
        Redirect::Handle(handle) => Ok((Pipe::invalid(), handle)),
    }
}

fn open_null(stream: Stream) -> Result<OwnedFd> {
    let direction = match stream {
        Stream::In => OFlag::O_RDONLY,
        Stream::Out | Stream::Err => OFlag::O_WRONLY,
    };
    let fd = nix::fcntl::open(
        Path::new("/dev/null"),
        direction | OFlag::O_CLOEXEC,
        Mode::empty(),
    )
    .map_err(Error::from)?;
    // SAFETY: open returned a fresh descriptor we own.
    unsafe { Ok(OwnedFd::from_raw_fd(fd)) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn test_pipe_orientation() {
        let (parent_in, _child_in) = setup(Stream::In, Redirect::Pipe, false, None).unwrap();
        // The stdin parent end is the write side.
        assert_eq!(parent_in.write(b"x").unwrap(), 1);

        let (parent_out, child_out) = setup(Stream::Out, Redirect::Pipe, false, None).unwrap();
        let child_out = Pipe::from(child_out);
        child_out.write(b"y").unwrap();
        let mut buffer = [0u8; 1];
        assert_eq!(parent_out.read(&mut buffer).unwrap(), 1);
        assert_eq!(buffer[0], b'y');
    }

    #[test]
    fn test_non_pipe_redirects_have_no_parent_end() {
        let (parent, child) = setup(Stream::Out, Redirect::Discard, false, None).unwrap();
        assert!(!parent.is_valid());
        assert!(child.as_raw_fd() >= 0);

        let (parent, child) = setup(Stream::Err, Redirect::Inherit, false, None).unwrap();
        assert!(!parent.is_valid());
        assert!(child.as_raw_fd() > libc::STDERR_FILENO);
    }

    #[test]
    fn test_stderr_merges_onto_stdout_pipe() {
        let (parent_out, child_out) = setup(Stream::Out, Redirect::Pipe, false, None).unwrap();
        let (parent_err, child_err) = setup(
            Stream::Err,
            Redirect::Parent(Stream::Out),
            false,
            Some(child_out.as_raw_fd()),
        )
        .unwrap();
        assert!(!parent_err.is_valid());

        // Writing through the merged stderr handle lands on the stdout pipe.
        let child_err = Pipe::from(child_err);
        child_err.write(b"z").unwrap();
        let mut buffer = [0u8; 1];
        assert_eq!(parent_out.read(&mut buffer).unwrap(), 1);
        assert_eq!(buffer[0], b'z');
        drop(child_out);
    }
}
