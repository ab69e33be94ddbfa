//! Multiplexer behavior: readiness, timeouts, deadlines, exit events.

use procbox::{
    poll, Event, EventSource, Options, Process, Redirect, RedirectOptions, StopAction,
    StopActions, StopKind, Timeout,
};
use std::time::Duration;

fn kill_stop() -> StopActions {
    StopActions {
        first: StopAction::new(StopKind::Kill, Timeout::Finite(Duration::from_secs(5))),
        ..StopActions::default()
    }
}

fn start_silent() -> Process {
    let mut process = Process::new();
    process
        .start(
            &["cat"],
            Options {
                stop: kill_stop(),
                ..Options::default()
            },
        )
        .unwrap();
    process
}

#[test]
fn test_zero_timeout_reports_timed_out() {
    let mut process = start_silent();

    let mut sources = [EventSource::new(&mut process, Event::OUT)];
    let r = poll(&mut sources, Timeout::Finite(Duration::ZERO));
    assert_eq!(r, Err(procbox::Error::TimedOut));
}

#[test]
fn test_stdin_reports_writable() {
    let mut process = start_silent();

    let mut sources = [EventSource::new(&mut process, Event::IN)];
    poll(&mut sources, Timeout::Infinite).unwrap();
    assert!(sources[0].events.contains(Event::IN));
}

#[test]
fn test_poll_rejects_deadline_timeout() {
    let mut process = start_silent();
    let mut sources = [EventSource::new(&mut process, Event::OUT)];
    assert!(matches!(
        poll(&mut sources, Timeout::Deadline),
        Err(procbox::Error::InvalidArgument(_))
    ));
}

#[test]
fn test_deadline_reported_as_event_not_error() {
    let mut process = Process::new();
    process
        .start(
            &["cat"],
            Options {
                timeout: Some(Duration::from_millis(100)),
                stop: kill_stop(),
                ..Options::default()
            },
        )
        .unwrap();

    // The wait horizon is the deadline, and its expiry is an event.
    let mut sources = [EventSource::new(&mut process, Event::OUT)];
    poll(&mut sources, Timeout::Infinite).unwrap();
    assert_eq!(sources[0].events, Event::DEADLINE);
}

#[test]
fn test_expired_deadline_reports_immediately() {
    let mut process = Process::new();
    process
        .start(
            &["cat"],
            Options {
                timeout: Some(Duration::from_millis(20)),
                stop: kill_stop(),
                ..Options::default()
            },
        )
        .unwrap();

    std::thread::sleep(Duration::from_millis(50));

    // Already overdue on entry: no I/O wait happens at all.
    let started = std::time::Instant::now();
    let mut sources = [EventSource::new(&mut process, Event::OUT)];
    poll(&mut sources, Timeout::Infinite).unwrap();
    assert_eq!(sources[0].events, Event::DEADLINE);
    assert!(started.elapsed() < Duration::from_millis(20));
}

#[test]
fn test_no_watchable_pipes_is_broken_pipe() {
    let mut process = Process::new();
    process
        .start(
            &["/bin/sh", "-c", "exit 0"],
            Options {
                redirect: RedirectOptions {
                    stdin: Redirect::Discard,
                    stdout: Redirect::Discard,
                    stderr: Redirect::Discard,
                },
                stop: kill_stop(),
                ..Options::default()
            },
        )
        .unwrap();

    let mut sources = [EventSource::new(&mut process, Event::OUT | Event::ERR)];
    let r = poll(&mut sources, Timeout::Infinite);
    assert_eq!(r, Err(procbox::Error::BrokenPipe));

    process.wait(Timeout::Infinite).unwrap();
}

#[test]
fn test_exit_event() {
    let mut process = Process::new();
    process
        .start(
            &["/bin/sh", "-c", "exit 5"],
            Options {
                stop: kill_stop(),
                ..Options::default()
            },
        )
        .unwrap();

    let mut sources = [EventSource::new(&mut process, Event::EXIT)];
    poll(&mut sources, Timeout::Infinite).unwrap();
    assert!(sources[0].events.contains(Event::EXIT));

    // The exit was signalled, so collecting it does not block.
    assert_eq!(process.wait(Timeout::Finite(Duration::ZERO)).unwrap(), 5);
}

#[test]
fn test_poll_across_processes() {
    let mut quick = Process::new();
    quick
        .start(
            &["/bin/sh", "-c", "exit 0"],
            Options {
                stop: kill_stop(),
                ..Options::default()
            },
        )
        .unwrap();
    let mut silent = start_silent();

    let mut sources = [
        EventSource::new(&mut silent, Event::OUT | Event::EXIT),
        EventSource::new(&mut quick, Event::OUT | Event::EXIT),
    ];
    poll(&mut sources, Timeout::Infinite).unwrap();

    assert!(sources[1].events.contains(Event::EXIT));
    assert!(!sources[0].events.contains(Event::EXIT));

    quick.wait(Timeout::Infinite).unwrap();
    silent.kill().unwrap();
    silent.wait(Timeout::Infinite).unwrap();
}
