//! Pipe primitives: an owned file-descriptor wrapper with an invalid
//! sentinel, pair creation, blocking-mode control, byte I/O and the
//! platform readiness wait.
//!
//! Every handle held by the crate is either valid and exclusively owned,
//! or invalid. `destroy` is idempotent and always leaves the sentinel
//! behind, which keeps cleanup on error paths unconditional.

use crate::clock;
use crate::error::{Error, Result};
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd;
use std::os::unix::io::{FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::time::{Duration, Instant};

const INVALID: RawFd = -1;

/// One end of a unidirectional byte pipe.
#[derive(Debug)]
pub(crate) struct Pipe {
    fd: RawFd,
}

impl Pipe {
    /// The invalid sentinel.
    pub(crate) const fn invalid() -> Self {
        Pipe { fd: INVALID }
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.fd >= 0
    }

    /// The raw descriptor, or `None` for the sentinel.
    pub(crate) fn fd(&self) -> Option<RawFd> {
        self.is_valid().then_some(self.fd)
    }

    /// Switches non-blocking mode on the parent end. Needed when a write
    /// may exceed the kernel's pipe buffer capacity.
    pub(crate) fn set_nonblocking(&self, enabled: bool) -> Result<()> {
        let flags = fcntl(self.fd, FcntlArg::F_GETFL).map_err(Error::from)?;
        let mut flags = OFlag::from_bits_truncate(flags);
        flags.set(OFlag::O_NONBLOCK, enabled);
        fcntl(self.fd, FcntlArg::F_SETFL(flags)).map_err(Error::from)?;
        Ok(())
    }

    /// Reads up to `buffer.len()` bytes. End-of-stream from the remote
    /// end maps to `BrokenPipe`.
    pub(crate) fn read(&self, buffer: &mut [u8]) -> Result<usize> {
        if buffer.is_empty() {
            return Ok(0);
        }

        loop {
            match unistd::read(self.fd, buffer) {
                Ok(0) => return Err(Error::BrokenPipe),
                Ok(n) => return Ok(n),
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(errno.into()),
            }
        }
    }

    /// Writes from `buffer`, possibly short. A closed remote end maps to
    /// `BrokenPipe`.
    pub(crate) fn write(&self, buffer: &[u8]) -> Result<usize> {
        loop {
            match unistd::write(self.fd, buffer) {
                Ok(n) => return Ok(n),
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(errno.into()),
            }
        }
    }

    /// Closes the descriptor if valid and leaves the sentinel. Idempotent.
    pub(crate) fn destroy(&mut self) {
        if self.is_valid() {
            let _ = unistd::close(self.fd);
            self.fd = INVALID;
        }
    }
}

impl From<OwnedFd> for Pipe {
    fn from(fd: OwnedFd) -> Self {
        Pipe {
            fd: fd.into_raw_fd(),
        }
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Creates a connected pipe pair, both ends close-on-exec so concurrently
/// launched children never inherit stray descriptors. Returns
/// `(read end, write end)`.
pub(crate) fn pair() -> Result<(OwnedFd, OwnedFd)> {
    let (read, write) = unistd::pipe2(OFlag::O_CLOEXEC).map_err(Error::from)?;
    // SAFETY: pipe2 returned two freshly created descriptors we own.
    unsafe { Ok((OwnedFd::from_raw_fd(read), OwnedFd::from_raw_fd(write))) }
}

/// Duplicates a descriptor onto a close-on-exec copy above the standard
/// streams.
pub(crate) fn dup_cloexec(fd: RawFd) -> Result<OwnedFd> {
    let duplicate = fcntl(fd, FcntlArg::F_DUPFD_CLOEXEC(3)).map_err(Error::from)?;
    // SAFETY: F_DUPFD_CLOEXEC returned a fresh descriptor we own.
    unsafe { Ok(OwnedFd::from_raw_fd(duplicate)) }
}

/// One descriptor in a readiness wait.
pub(crate) struct WaitFd {
    pub fd: RawFd,
    pub writable: bool,
    pub ready: bool,
}

impl WaitFd {
    pub(crate) fn readable(fd: RawFd) -> Self {
        WaitFd {
            fd,
            writable: false,
            ready: false,
        }
    }

    pub(crate) fn writable(fd: RawFd) -> Self {
        WaitFd {
            fd,
            writable: true,
            ready: false,
        }
    }
}

/// Blocks until at least one descriptor is ready or the horizon elapses.
/// `None` waits forever. Interrupted waits re-arm with the remaining
/// time. Errors with `TimedOut` when nothing became ready.
pub(crate) fn wait(fds: &mut [WaitFd], horizon: Option<Duration>) -> Result<()> {
    let started = Instant::now();

    loop {
        let left = horizon.map(|horizon| horizon.saturating_sub(started.elapsed()));
        let millis = clock::poll_millis(left);

        let mut pollfds: Vec<libc::pollfd> = fds
            .iter()
            .map(|entry| libc::pollfd {
                fd: entry.fd,
                events: if entry.writable {
                    libc::POLLOUT
                } else {
                    libc::POLLIN
                },
                revents: 0,
            })
            .collect();

        // SAFETY: pollfds is a live, correctly sized array for the call.
        let r = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, millis) };

        if r < 0 {
            match Errno::last() {
                Errno::EINTR => continue,
                errno => return Err(errno.into()),
            }
        }

        if r == 0 {
            return Err(Error::TimedOut);
        }

        for (entry, pollfd) in fds.iter_mut().zip(&pollfds) {
            // Hang-up counts as readable so pending end-of-stream is
            // observed; error conditions surface through the subsequent
            // read or write.
            let mask = if entry.writable {
                libc::POLLOUT | libc::POLLERR
            } else {
                libc::POLLIN | libc::POLLHUP | libc::POLLERR
            };
            entry.ready = pollfd.revents & mask != 0;
        }

        return Ok(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_roundtrip() {
        let (read, write) = pair().unwrap();
        let write = Pipe::from(write);
        let read = Pipe::from(read);

        assert_eq!(write.write(b"ping").unwrap(), 4);
        let mut buffer = [0u8; 16];
        assert_eq!(read.read(&mut buffer).unwrap(), 4);
        assert_eq!(&buffer[..4], b"ping");
    }

    #[test]
    fn test_read_after_writer_closed_is_broken_pipe() {
        let (read, write) = pair().unwrap();
        let read = Pipe::from(read);
        drop(write);

        let mut buffer = [0u8; 4];
        assert_eq!(read.read(&mut buffer), Err(Error::BrokenPipe));
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let (read, _write) = pair().unwrap();
        let mut read = Pipe::from(read);

        assert!(read.is_valid());
        read.destroy();
        assert!(!read.is_valid());
        read.destroy();
        assert!(!read.is_valid());
        assert_eq!(read.fd(), None);
    }

    #[test]
    fn test_empty_read_is_a_noop() {
        let (read, _write) = pair().unwrap();
        let read = Pipe::from(read);
        assert_eq!(read.read(&mut []).unwrap(), 0);
    }

    #[test]
    fn test_wait_times_out() {
        let (read, _write) = pair().unwrap();
        let read = Pipe::from(read);

        let mut fds = [WaitFd::readable(read.fd().unwrap())];
        let r = wait(&mut fds, Some(Duration::from_millis(10)));
        assert_eq!(r, Err(Error::TimedOut));
    }

    #[test]
    fn test_wait_reports_readiness() {
        let (read, write) = pair().unwrap();
        let read = Pipe::from(read);
        let write = Pipe::from(write);

        write.write(b"x").unwrap();

        let mut fds = [
            WaitFd::readable(read.fd().unwrap()),
            WaitFd::writable(write.fd().unwrap()),
        ];
        wait(&mut fds, None).unwrap();
        assert!(fds[0].ready);
        assert!(fds[1].ready);
    }
}
