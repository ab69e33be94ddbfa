//! Multiplexed readiness wait over any number of supervised processes.

use crate::clock::Timeout;
use crate::error::{Error, Result};
use crate::pipe::{self, WaitFd};
use crate::process::Process;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::time::{Duration, Instant};

/// Readiness bitmask for one process in one `poll` call.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Event(u8);

impl Event {
    /// No readiness.
    pub const NONE: Event = Event(0);
    /// Standard input is writable.
    pub const IN: Event = Event(1);
    /// Standard output is readable.
    pub const OUT: Event = Event(1 << 1);
    /// Standard error is readable.
    pub const ERR: Event = Event(1 << 2);
    /// The child has exited.
    pub const EXIT: Event = Event(1 << 3);
    /// The process deadline has passed. Never requested as an interest;
    /// reported on the overdue process instead of a `TimedOut` error.
    pub const DEADLINE: Event = Event(1 << 4);

    pub fn contains(self, other: Event) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Event) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Event {
    type Output = Event;

    fn bitor(self, rhs: Event) -> Event {
        Event(self.0 | rhs.0)
    }
}

impl BitOrAssign for Event {
    fn bitor_assign(&mut self, rhs: Event) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Event {
    type Output = Event;

    fn bitand(self, rhs: Event) -> Event {
        Event(self.0 & rhs.0)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Event::IN, "IN"),
            (Event::OUT, "OUT"),
            (Event::ERR, "ERR"),
            (Event::EXIT, "EXIT"),
            (Event::DEADLINE, "DEADLINE"),
        ];
        let mut first = true;
        for (bit, name) in names {
            if self.contains(bit) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        if first {
            write!(f, "NONE")?;
        }
        Ok(())
    }
}

/// One process in a `poll` call: the readiness the caller is interested
/// in, and the readiness the multiplexer observed.
pub struct EventSource<'a> {
    pub process: &'a mut Process,
    pub interests: Event,
    pub events: Event,
}

impl<'a> EventSource<'a> {
    pub fn new(process: &'a mut Process, interests: Event) -> Self {
        EventSource {
            process,
            interests,
            events: Event::NONE,
        }
    }
}

/// Waits until a stream of any source becomes ready, a child exits, the
/// earliest per-process deadline passes, or `timeout` elapses.
///
/// Deadlines report as a `DEADLINE` event on the overdue source; the
/// caller's timeout reports as a `TimedOut` error. A deadline that has
/// already passed on entry is reported immediately without waiting.
/// Fails with `BrokenPipe` when no source has a pipe left to watch.
pub fn poll(sources: &mut [EventSource<'_>], timeout: Timeout) -> Result<()> {
    if sources.is_empty() {
        return Err(Error::InvalidArgument("no event sources"));
    }

    let timeout = match timeout {
        Timeout::Infinite => None,
        Timeout::Finite(duration) => Some(duration),
        Timeout::Deadline => {
            return Err(Error::InvalidArgument(
                "a deadline timeout is only valid for wait",
            ))
        }
    };

    for source in sources.iter_mut() {
        source.events = Event::NONE;
    }

    let now = Instant::now();
    let mut earliest: Option<(usize, Instant)> = None;
    for (index, source) in sources.iter().enumerate() {
        if let Some(deadline) = source.process.deadline_instant() {
            if earliest.map_or(true, |(_, current)| deadline < current) {
                earliest = Some((index, deadline));
            }
        }
    }

    if let Some((index, deadline)) = earliest {
        if deadline <= now {
            sources[index].events = Event::DEADLINE;
            return Ok(());
        }
    }

    let until_deadline = earliest.map(|(_, deadline)| deadline.duration_since(now));
    let (horizon, deadline_is_horizon) = effective_horizon(timeout, until_deadline);

    let mut fds: Vec<WaitFd> = Vec::new();
    let mut origins: Vec<(usize, Event)> = Vec::new();
    for (index, source) in sources.iter().enumerate() {
        for interest in [Event::IN, Event::OUT, Event::ERR, Event::EXIT] {
            if source.interests.contains(interest) {
                if let Some(fd) = source.process.event_fd(interest) {
                    if interest == Event::IN {
                        fds.push(WaitFd::writable(fd));
                    } else {
                        fds.push(WaitFd::readable(fd));
                    }
                    origins.push((index, interest));
                }
            }
        }
    }

    if fds.is_empty() {
        return Err(Error::BrokenPipe);
    }

    match pipe::wait(&mut fds, horizon) {
        Ok(()) => {
            for (entry, (index, interest)) in fds.iter().zip(origins) {
                if entry.ready {
                    sources[index].events |= interest;
                }
            }
            Ok(())
        }
        Err(Error::TimedOut) if deadline_is_horizon => {
            if let Some((index, _)) = earliest {
                sources[index].events = Event::DEADLINE;
            }
            Ok(())
        }
        Err(error) => Err(error),
    }
}

/// The effective wait horizon is the nearer of the caller's timeout and
/// the earliest deadline, with infinity neutral. Ties resolve to the
/// deadline so an overdue process reports as an event rather than an
/// error.
fn effective_horizon(
    timeout: Option<Duration>,
    until_deadline: Option<Duration>,
) -> (Option<Duration>, bool) {
    match (timeout, until_deadline) {
        (None, None) => (None, false),
        (Some(timeout), None) => (Some(timeout), false),
        (None, Some(deadline)) => (Some(deadline), true),
        (Some(timeout), Some(deadline)) => {
            if deadline <= timeout {
                (Some(deadline), true)
            } else {
                (Some(timeout), false)
            }
        }
    }
}
