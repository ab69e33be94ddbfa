//! Launch options and their normalization.

use crate::clock::Timeout;
use crate::error::{Error, Result};
use crate::redirect::Redirect;
use serde::{Deserialize, Serialize};
use std::ffi::CString;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// A single stage of the stop escalation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopKind {
    /// Skip this stage.
    #[default]
    Noop,
    /// Send no signal, just wait.
    Wait,
    /// Request cooperative shutdown, then wait.
    Terminate,
    /// Shut the child down unconditionally, then wait.
    Kill,
}

/// A stop stage paired with how long to wait for it to take effect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopAction {
    pub kind: StopKind,
    pub timeout: Timeout,
}

impl StopAction {
    pub fn new(kind: StopKind, timeout: Timeout) -> Self {
        StopAction { kind, timeout }
    }
}

/// Up to three stop stages, tried in order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopActions {
    pub first: StopAction,
    pub second: StopAction,
    pub third: StopAction,
}

impl StopActions {
    fn is_noop(&self) -> bool {
        self.first.kind == StopKind::Noop
            && self.second.kind == StopKind::Noop
            && self.third.kind == StopKind::Noop
    }

    /// The default escalation: wait for the deadline, ask nicely, then
    /// force the issue.
    pub(crate) fn default_escalation() -> Self {
        StopActions {
            first: StopAction::new(StopKind::Wait, Timeout::Deadline),
            second: StopAction::new(StopKind::Terminate, Timeout::Deadline),
            third: StopAction::new(StopKind::Kill, Timeout::Deadline),
        }
    }
}

/// Redirections for the three standard streams. Each defaults to `Pipe`.
#[derive(Debug, Default)]
pub struct RedirectOptions {
    pub stdin: Redirect,
    pub stdout: Redirect,
    pub stderr: Redirect,
}

/// Options accepted by `Process::start`.
#[derive(Debug, Default)]
pub struct Options {
    /// Replaces the child's environment. `None` inherits the parent's.
    pub environment: Option<Vec<(String, String)>>,
    /// Working directory for the child. `None` inherits the parent's.
    pub working_directory: Option<PathBuf>,
    /// Standard stream redirections.
    pub redirect: RedirectOptions,
    /// Switch parent pipe ends to non-blocking mode.
    pub nonblocking: bool,
    /// Bytes delivered to the child's stdin during start; stdin is closed
    /// once everything is written.
    pub input: Vec<u8>,
    /// Stop escalation run implicitly on drop while still in progress.
    /// All-noop actions are replaced with the default escalation.
    pub stop: StopActions,
    /// Relative bound on the child's lifetime, converted to a deadline.
    pub timeout: Option<Duration>,
    /// Absolute alternative to `timeout`. Setting both is an error.
    pub deadline: Option<Instant>,
    /// Fork without launching a program: `start` returns in both the
    /// parent and the child branch.
    pub fork: bool,
}

pub(crate) struct ParsedOptions {
    pub argv: Vec<CString>,
    pub env: Option<Vec<CString>>,
    pub working_directory: Option<PathBuf>,
    pub redirect: RedirectOptions,
    pub nonblocking: bool,
    pub input: Vec<u8>,
    pub stop: StopActions,
    pub timeout: Option<Duration>,
    pub deadline: Option<Instant>,
    pub fork: bool,
}

/// Validates the argument vector and normalizes the options.
pub(crate) fn parse<S: AsRef<str>>(argv: &[S], options: Options) -> Result<ParsedOptions> {
    if options.fork {
        if !argv.is_empty() {
            return Err(Error::InvalidArgument("fork takes no argument vector"));
        }
        if !options.input.is_empty() {
            return Err(Error::InvalidArgument("fork takes no input"));
        }
    } else if argv.is_empty() {
        return Err(Error::InvalidArgument("empty argument vector"));
    }

    if options.timeout.is_some() && options.deadline.is_some() {
        return Err(Error::InvalidArgument(
            "timeout and deadline are mutually exclusive",
        ));
    }

    let argv = argv
        .iter()
        .map(|arg| CString::new(arg.as_ref()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| Error::InvalidArgument("argument contains a NUL byte"))?;

    let env = match &options.environment {
        None => None,
        Some(variables) => {
            let entries = variables
                .iter()
                .map(|(key, value)| CString::new(format!("{key}={value}")))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|_| Error::InvalidArgument("environment contains a NUL byte"))?;
            Some(entries)
        }
    };

    let stop = if options.stop.is_noop() {
        StopActions::default_escalation()
    } else {
        options.stop
    };

    Ok(ParsedOptions {
        argv,
        env,
        working_directory: options.working_directory,
        redirect: options.redirect,
        nonblocking: options.nonblocking,
        input: options.input,
        stop,
        timeout: options.timeout,
        deadline: options.deadline,
        fork: options.fork,
    })
}
