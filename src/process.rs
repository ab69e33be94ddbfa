//! The per-process lifecycle state machine.
//!
//! A `Process` owns the parent ends of up to four pipes and the identity
//! of the launched child. Its status moves `NotStarted -> InProgress ->
//! Exited(code)`, with `InChild` as the degenerate terminal state of the
//! forked child branch. Every handle field is either valid and
//! exclusively owned or invalid, in every reachable state.

use crate::clock::{self, Timeout};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::init;
use crate::options::{self, Options, StopActions, StopKind};
use crate::pipe::{self, Pipe, WaitFd};
use crate::redirect::{self, Stream};
use crate::spawn::{self, Launch, Spawned};
use log::{debug, trace};
use nix::errno::Errno;
use nix::unistd::Pid;
use std::os::unix::io::{AsRawFd, IntoRawFd, RawFd};
use std::time::Instant;

/// Lifecycle status of a supervised process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// `start` has not been called yet.
    NotStarted,
    /// The child is running (or has exited but was not collected yet).
    InProgress,
    /// This handle belongs to the forked child branch. Only dropping it
    /// is legal.
    InChild,
    /// The exit code has been collected.
    Exited(i32),
}

/// Which branch `start` returned in. `Child` only occurs with the `fork`
/// option on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartResult {
    Parent,
    Child,
}

/// A supervised child process with redirected standard streams.
#[derive(Debug)]
pub struct Process {
    child: Option<Pid>,
    stdin: Pipe,
    stdout: Pipe,
    stderr: Pipe,
    exit: Pipe,
    status: Status,
    stop: StopActions,
    deadline: Option<Instant>,
}

impl Default for Process {
    fn default() -> Self {
        Process::new()
    }
}

impl Process {
    /// Creates a process handle in the `NotStarted` state.
    pub fn new() -> Self {
        Process {
            child: None,
            stdin: Pipe::invalid(),
            stdout: Pipe::invalid(),
            stderr: Pipe::invalid(),
            exit: Pipe::invalid(),
            status: Status::NotStarted,
            stop: StopActions::default(),
            deadline: None,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// OS identity of the running child, if any.
    pub fn pid(&self) -> Option<u32> {
        self.child.map(|child| child.as_raw() as u32)
    }

    /// Launches the child described by `argv` with the given options.
    ///
    /// On success the process is `InProgress` and owns the parent ends of
    /// the redirected streams. With the `fork` option the call returns in
    /// both branches; the child branch gets `StartResult::Child` and a
    /// handle that only supports being dropped. On failure everything
    /// acquired during the call is released and the process stays
    /// `NotStarted`.
    pub fn start<S: AsRef<str>>(&mut self, argv: &[S], options: Options) -> Result<StartResult> {
        if self.status != Status::NotStarted {
            return Err(Error::InvalidArgument("process was already started"));
        }

        let parsed = options::parse(argv, options)?;
        init::init()?;

        match self.start_inner(parsed) {
            Ok(result) => Ok(result),
            Err(error) => {
                if let Some(child) = self.child.take() {
                    let _ = spawn::kill_child(child);
                    spawn::reap(child);
                }
                self.stdin.destroy();
                self.stdout.destroy();
                self.stderr.destroy();
                self.exit.destroy();
                init::deinit();
                Err(error)
            }
        }
    }

    fn start_inner(&mut self, parsed: options::ParsedOptions) -> Result<StartResult> {
        let options::ParsedOptions {
            argv,
            env,
            working_directory,
            redirect,
            nonblocking,
            input,
            stop,
            timeout,
            deadline,
            fork,
        } = parsed;

        let (parent_in, child_in) = redirect::setup(Stream::In, redirect.stdin, nonblocking, None)?;
        self.stdin = parent_in;

        let (parent_out, child_out) =
            redirect::setup(Stream::Out, redirect.stdout, nonblocking, None)?;
        self.stdout = parent_out;

        let (parent_err, child_err) = redirect::setup(
            Stream::Err,
            redirect.stderr,
            nonblocking,
            Some(child_out.as_raw_fd()),
        )?;
        self.stderr = parent_err;

        let (exit_read, exit_write) = pipe::pair()?;
        self.exit = Pipe::from(exit_read);

        let launch = Launch {
            argv: &argv,
            env: env.as_deref(),
            working_directory: working_directory.as_deref(),
            stdio: [
                child_in.as_raw_fd(),
                child_out.as_raw_fd(),
                child_err.as_raw_fd(),
            ],
            exit: exit_write.as_raw_fd(),
            fork_only: fork,
        };

        match spawn::spawn(&launch)? {
            Spawned::Parent(child) => {
                self.child = Some(child);

                // The child consumes its stdin concurrently, so even
                // inputs larger than the kernel pipe buffer deliver.
                if !input.is_empty() {
                    setup_input(&mut self.stdin, &input)?;
                }

                self.stop = stop;
                self.deadline = deadline.or_else(|| timeout.map(|timeout| Instant::now() + timeout));
                self.status = Status::InProgress;
                debug!("started pid {child}");
                Ok(StartResult::Parent)
                // Child-side handles drop here; in the child they were
                // duplicated onto the standard streams.
            }
            Spawned::Child => {
                // Forked child branch: the exit end must stay open for
                // the lifetime of this process so the parent observes its
                // termination.
                let _ = exit_write.into_raw_fd();
                self.stdin.destroy();
                self.stdout.destroy();
                self.stderr.destroy();
                self.exit.destroy();
                self.child = None;
                self.status = Status::InChild;
                Ok(StartResult::Child)
            }
        }
    }

    /// Reads from the child's standard output or error, honoring the
    /// process deadline. End-of-stream destroys the pipe, so subsequent
    /// reads deterministically return `BrokenPipe`.
    pub fn read(&mut self, stream: Stream, buffer: &mut [u8]) -> Result<usize> {
        if self.status == Status::InChild {
            return Err(Error::InvalidArgument("process handle is the child branch"));
        }

        let deadline = self.deadline;
        let pipe = match stream {
            Stream::Out => &mut self.stdout,
            Stream::Err => &mut self.stderr,
            Stream::In => return Err(Error::InvalidArgument("cannot read standard input")),
        };

        let Some(fd) = pipe.fd() else {
            return Err(Error::BrokenPipe);
        };
        if buffer.is_empty() {
            return Ok(0);
        }

        pipe::wait(&mut [WaitFd::readable(fd)], clock::remaining(deadline))?;

        match pipe.read(buffer) {
            Err(Error::BrokenPipe) => {
                pipe.destroy();
                Err(Error::BrokenPipe)
            }
            other => other,
        }
    }

    /// Writes to the child's standard input. An empty buffer is a no-op.
    /// A closed remote end destroys the pipe, so subsequent writes
    /// deterministically return `BrokenPipe`.
    pub fn write(&mut self, buffer: &[u8]) -> Result<usize> {
        if self.status == Status::InChild {
            return Err(Error::InvalidArgument("process handle is the child branch"));
        }
        if buffer.is_empty() {
            return Ok(0);
        }
        if !self.stdin.is_valid() {
            return Err(Error::BrokenPipe);
        }

        match self.stdin.write(buffer) {
            Err(Error::BrokenPipe) => {
                self.stdin.destroy();
                Err(Error::BrokenPipe)
            }
            other => other,
        }
    }

    /// Closes a standard stream pipe. Closing stdin is how the child is
    /// told no more input is coming. Idempotent.
    pub fn close(&mut self, stream: Stream) -> Result<()> {
        if self.status == Status::InChild {
            return Err(Error::InvalidArgument("process handle is the child branch"));
        }

        match stream {
            Stream::In => self.stdin.destroy(),
            Stream::Out => self.stdout.destroy(),
            Stream::Err => self.stderr.destroy(),
        }
        Ok(())
    }

    /// Waits for the child to exit and collects its exit code. A
    /// `Timeout::Deadline` waits until the process deadline. On timeout
    /// the process stays `InProgress`; once collected, the code is stored
    /// and returned again by subsequent calls.
    pub fn wait(&mut self, timeout: Timeout) -> Result<i32> {
        let child = match self.status {
            Status::Exited(code) => return Ok(code),
            Status::InProgress => match self.child {
                Some(child) => child,
                None => return Err(Error::InvalidArgument("process has no child")),
            },
            Status::NotStarted => {
                return Err(Error::InvalidArgument("process was not started"))
            }
            Status::InChild => {
                return Err(Error::InvalidArgument("process handle is the child branch"))
            }
        };

        let horizon = match timeout {
            Timeout::Infinite => None,
            Timeout::Deadline => clock::remaining(self.deadline),
            Timeout::Finite(duration) => Some(duration),
        };

        let Some(fd) = self.exit.fd() else {
            return Err(Error::BrokenPipe);
        };
        pipe::wait(&mut [WaitFd::readable(fd)], horizon)?;

        let code = spawn::wait_child(child)?;
        self.exit.destroy();
        self.child = None;
        self.status = Status::Exited(code);
        debug!("pid {child} exited with code {code}");
        Ok(code)
    }

    /// Requests cooperative shutdown. Does not collect the exit code; on
    /// an already-collected process this is a successful no-op.
    pub fn terminate(&mut self) -> Result<()> {
        self.signal(spawn::terminate_child, "terminate")
    }

    /// Shuts the child down unconditionally. Does not collect the exit
    /// code; on an already-collected process this is a successful no-op.
    pub fn kill(&mut self) -> Result<()> {
        self.signal(spawn::kill_child, "kill")
    }

    fn signal(&mut self, send: fn(Pid) -> Result<()>, what: &str) -> Result<()> {
        match self.status {
            Status::Exited(_) => Ok(()),
            Status::InProgress => match self.child {
                Some(child) => {
                    trace!("{what} pid {child}");
                    send(child)
                }
                None => Err(Error::InvalidArgument("process has no child")),
            },
            Status::NotStarted => Err(Error::InvalidArgument("process was not started")),
            Status::InChild => Err(Error::InvalidArgument("process handle is the child branch")),
        }
    }

    /// Runs the stop escalation: each non-noop action signals (or not)
    /// and then waits with its own timeout. The first wait that does not
    /// time out ends the sequence with its result; a failed signal ends
    /// it immediately. Three timeouts report `TimedOut`.
    pub fn stop(&mut self, actions: StopActions) -> Result<i32> {
        if self.status == Status::InChild {
            return Err(Error::InvalidArgument("process handle is the child branch"));
        }
        if self.status == Status::NotStarted {
            return Err(Error::InvalidArgument("process was not started"));
        }

        for action in [actions.first, actions.second, actions.third] {
            match action.kind {
                StopKind::Noop => continue,
                StopKind::Wait => {}
                StopKind::Terminate => self.terminate()?,
                StopKind::Kill => self.kill()?,
            }

            trace!("stop: {:?} (timeout {:?})", action.kind, action.timeout);
            match self.wait(action.timeout) {
                Err(Error::TimedOut) => continue,
                result => return result,
            }
        }

        Err(Error::TimedOut)
    }

    pub(crate) fn deadline_instant(&self) -> Option<Instant> {
        self.deadline
    }

    /// The descriptor watched for one interest bit, if that pipe is still
    /// valid.
    pub(crate) fn event_fd(&self, interest: Event) -> Option<RawFd> {
        if interest == Event::IN {
            self.stdin.fd()
        } else if interest == Event::OUT {
            self.stdout.fd()
        } else if interest == Event::ERR {
            self.stderr.fd()
        } else if interest == Event::EXIT {
            self.exit.fd()
        } else {
            None
        }
    }
}

impl Drop for Process {
    /// A still-running child is stopped with the configured escalation
    /// (best effort), every handle is released, and the process-global
    /// bracket is left iff the process was ever started.
    fn drop(&mut self) {
        if self.status == Status::InProgress {
            trace!("dropping in-progress process, running stop sequence");
            let _ = self.stop(self.stop);
        }

        self.child = None;
        self.stdin.destroy();
        self.stdout.destroy();
        self.stderr.destroy();
        self.exit.destroy();

        if self.status != Status::NotStarted {
            init::deinit();
        }
    }
}

/// Delivers the start-time input to the child's stdin and closes it. The
/// pipe runs in non-blocking mode; when the kernel buffer fills, the
/// write parks on the readiness wait until the child has drained some of
/// it.
fn setup_input(stdin: &mut Pipe, input: &[u8]) -> Result<()> {
    if !stdin.is_valid() {
        return Err(Error::BrokenPipe);
    }

    stdin.set_nonblocking(true)?;

    let mut written = 0;
    while written < input.len() {
        match stdin.write(&input[written..]) {
            Ok(n) => written += n,
            Err(Error::Os(Errno::EAGAIN)) => {
                if let Some(fd) = stdin.fd() {
                    pipe::wait(&mut [WaitFd::writable(fd)], None)?;
                }
            }
            Err(error) => return Err(error),
        }
    }

    stdin.destroy();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_process_has_nothing() {
        let process = Process::new();
        assert_eq!(process.status(), Status::NotStarted);
        assert_eq!(process.pid(), None);
        assert_eq!(process.event_fd(Event::IN), None);
        assert_eq!(process.event_fd(Event::OUT), None);
        assert_eq!(process.event_fd(Event::ERR), None);
        assert_eq!(process.event_fd(Event::EXIT), None);
        assert_eq!(process.deadline_instant(), None);
    }

    #[test]
    fn test_operations_before_start() {
        let mut process = Process::new();
        let mut buffer = [0u8; 4];

        assert_eq!(
            process.read(Stream::Out, &mut buffer),
            Err(Error::BrokenPipe)
        );
        assert_eq!(process.write(b"data"), Err(Error::BrokenPipe));
        assert_eq!(process.close(Stream::In), Ok(()));
        assert!(matches!(
            process.wait(Timeout::Infinite),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            process.terminate(),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(process.kill(), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            process.stop(StopActions::default()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_empty_write_is_a_noop() {
        let mut process = Process::new();
        // Succeeds even though no pipe exists.
        assert_eq!(process.write(&[]), Ok(0));
    }

    #[test]
    fn test_reading_stdin_is_invalid() {
        let mut process = Process::new();
        let mut buffer = [0u8; 4];
        assert!(matches!(
            process.read(Stream::In, &mut buffer),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_start_rejects_missing_program() {
        let mut process = Process::new();
        let r = process.start(&["definitely-not-a-real-program"], Options::default());
        assert!(matches!(r, Err(Error::Os(_))));
        // Failed start rolls everything back.
        assert_eq!(process.status(), Status::NotStarted);
        assert_eq!(process.event_fd(Event::OUT), None);
        assert_eq!(process.event_fd(Event::EXIT), None);
    }
}
