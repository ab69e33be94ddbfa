//! The process launcher: fork/exec with redirected standard streams and
//! the exit-signal pipe installed, plus the child-identity primitives
//! used by wait, terminate and kill.
//!
//! Every descriptor created by the crate is close-on-exec. The child
//! duplicates its stdio handles onto the standard streams (which clears
//! the flag) and explicitly keeps the exit-pipe end, so exec leaks
//! nothing else into the launched program.

use crate::error::{Error, Result};
use crate::pipe;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::signal::{kill, signal, SigHandler, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{self, ForkResult, Pid};
use std::ffi::CString;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

/// Exit codes for children that died on a signal are offset past the
/// 0-255 range of normal exits.
pub const SIGNAL_OFFSET: i32 = 128;

/// Exit code reported for a child that was killed unconditionally.
pub const EXIT_SIGKILL: i32 = SIGNAL_OFFSET + 9;

/// Exit code reported for a child that honored a cooperative shutdown
/// request.
pub const EXIT_SIGTERM: i32 = SIGNAL_OFFSET + 15;

pub(crate) struct Launch<'a> {
    pub argv: &'a [CString],
    pub env: Option<&'a [CString]>,
    pub working_directory: Option<&'a Path>,
    /// Child ends for stdin, stdout, stderr.
    pub stdio: [RawFd; 3],
    /// Child end of the exit-signal pipe. Kept open across exec so the
    /// kernel closes it exactly when the child terminates.
    pub exit: RawFd,
    /// Fork without exec; the caller continues in both branches.
    pub fork_only: bool,
}

#[derive(Debug)]
pub(crate) enum Spawned {
    Parent(Pid),
    Child,
}

/// Launches the child. Setup or exec failures inside the child are
/// reported back through a close-on-exec status pipe, so a bad program
/// name or working directory surfaces as an error here rather than as a
/// mysterious exit code.
pub(crate) fn spawn(launch: &Launch) -> Result<Spawned> {
    let (status_read, status_write) = pipe::pair()?;

    // SAFETY: the child branch only runs async-signal-tolerant setup and
    // then either execs or returns control to the caller (fork mode).
    match unsafe { unistd::fork() } {
        Err(errno) => Err(errno.into()),
        Ok(ForkResult::Child) => {
            drop(status_read);
            match child_setup(launch) {
                Ok(()) if launch.fork_only => {
                    drop(status_write);
                    Ok(Spawned::Child)
                }
                Err(errno) => {
                    let _ = unistd::write(status_write.as_raw_fd(), &(errno as i32).to_ne_bytes());
                    // SAFETY: terminating the child branch without
                    // running the parent's destructors.
                    unsafe { libc::_exit(127) }
                }
                // exec does not return on success.
                Ok(()) => unsafe { libc::_exit(127) },
            }
        }
        Ok(ForkResult::Parent { child }) => {
            drop(status_write);
            match read_child_errno(status_read.as_raw_fd()) {
                None => Ok(Spawned::Parent(child)),
                Some(errno) => {
                    reap(child);
                    Err(Errno::from_i32(errno).into())
                }
            }
        }
    }
}

/// Runs in the child between fork and exec. Returns only in fork mode or
/// on failure.
fn child_setup(launch: &Launch) -> std::result::Result<(), Errno> {
    // The parent ignores SIGPIPE while the library is active; the child
    // starts with the default disposition.
    // SAFETY: installing a default disposition is signal-safe.
    let _ = unsafe { signal(Signal::SIGPIPE, SigHandler::SigDfl) };

    for (source, target) in launch
        .stdio
        .iter()
        .zip([libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO])
    {
        if *source == target {
            // Already on the right stream; just clear close-on-exec.
            fcntl(target, FcntlArg::F_SETFD(FdFlag::empty()))?;
        } else {
            // dup2 clears close-on-exec on the duplicate.
            unistd::dup2(*source, target)?;
        }
    }

    // The exit-pipe end must survive exec and close only at process
    // termination.
    fcntl(launch.exit, FcntlArg::F_SETFD(FdFlag::empty()))?;

    if let Some(directory) = launch.working_directory {
        unistd::chdir(directory)?;
    }

    if launch.fork_only {
        return Ok(());
    }

    let program = &launch.argv[0];
    let errno = match launch.env {
        Some(env) => unistd::execvpe(program, launch.argv, env),
        None => unistd::execvp(program, launch.argv),
    }
    .err()
    .unwrap_or(Errno::UnknownErrno);

    Err(errno)
}

/// Reads the child's setup errno off the status pipe. End-of-stream
/// means exec succeeded (or the fork-mode child released the pipe).
fn read_child_errno(fd: RawFd) -> Option<i32> {
    let mut bytes = [0u8; 4];
    let mut filled = 0;

    while filled < bytes.len() {
        match unistd::read(fd, &mut bytes[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(Errno::EINTR) => continue,
            Err(_) => break,
        }
    }

    (filled == bytes.len()).then(|| i32::from_ne_bytes(bytes))
}

/// Collects the child's exit status, blocking until it terminates. A
/// termination signal `N` reports as `SIGNAL_OFFSET + N`.
pub(crate) fn wait_child(child: Pid) -> Result<i32> {
    loop {
        match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(code),
            Ok(WaitStatus::Signaled(_, sig, _)) => return Ok(SIGNAL_OFFSET + sig as i32),
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(errno) => return Err(errno.into()),
        }
    }
}

/// Requests cooperative shutdown.
pub(crate) fn terminate_child(child: Pid) -> Result<()> {
    kill(child, Signal::SIGTERM).map_err(Error::from)
}

/// Shuts the child down unconditionally.
pub(crate) fn kill_child(child: Pid) -> Result<()> {
    kill(child, Signal::SIGKILL).map_err(Error::from)
}

/// Best-effort reap for rollback paths.
pub(crate) fn reap(child: Pid) {
    let _ = wait_child(child);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redirect::{self, Redirect, Stream};

    fn argv(args: &[&str]) -> Vec<CString> {
        args.iter().map(|a| CString::new(*a).unwrap()).collect()
    }

    #[test]
    fn test_spawn_and_wait() {
        let (_, child_in) = redirect::setup(Stream::In, Redirect::Discard, false, None).unwrap();
        let (_, child_out) = redirect::setup(Stream::Out, Redirect::Discard, false, None).unwrap();
        let (_, child_err) = redirect::setup(Stream::Err, Redirect::Discard, false, None).unwrap();
        let (_exit_read, exit_write) = pipe::pair().unwrap();

        let argv = argv(&["sh", "-c", "exit 7"]);
        let launch = Launch {
            argv: &argv,
            env: None,
            working_directory: None,
            stdio: [
                child_in.as_raw_fd(),
                child_out.as_raw_fd(),
                child_err.as_raw_fd(),
            ],
            exit: exit_write.as_raw_fd(),
            fork_only: false,
        };

        match spawn(&launch).unwrap() {
            Spawned::Parent(child) => assert_eq!(wait_child(child).unwrap(), 7),
            Spawned::Child => unreachable!(),
        }
    }

    #[test]
    fn test_spawn_reports_missing_program() {
        let (_, child_in) = redirect::setup(Stream::In, Redirect::Discard, false, None).unwrap();
        let (_, child_out) = redirect::setup(Stream::Out, Redirect::Discard, false, None).unwrap();
        let (_, child_err) = redirect::setup(Stream::Err, Redirect::Discard, false, None).unwrap();
        let (_exit_read, exit_write) = pipe::pair().unwrap();

        let argv = argv(&["definitely-not-a-real-program"]);
        let launch = Launch {
            argv: &argv,
            env: None,
            working_directory: None,
            stdio: [
                child_in.as_raw_fd(),
                child_out.as_raw_fd(),
                child_err.as_raw_fd(),
            ],
            exit: exit_write.as_raw_fd(),
            fork_only: false,
        };

        match spawn(&launch) {
            Err(Error::Os(errno)) => assert_eq!(errno, Errno::ENOENT),
            other => panic!("expected ENOENT, got {other:?}"),
        }
    }
}
