//! procbox: child-process supervision with redirected standard streams.
//!
//! A [`Process`] launches a child with its stdio connected to pipes (or
//! inherited, discarded, merged or handed a caller descriptor), feeds it
//! input, reads its output, and walks it through a graceful stop
//! escalation. [`poll`] multiplexes readiness over any number of
//! processes at once, including exit notification and per-process
//! deadlines, so a caller can drive a whole fleet from one loop without
//! blocking on any single stream.
//!
//! ```no_run
//! use procbox::{Options, Process, Stream, Timeout};
//!
//! fn run() -> procbox::Result<()> {
//!     let mut process = Process::new();
//!     process.start(&["cat"], Options::default())?;
//!     process.write(b"hello")?;
//!     process.close(Stream::In)?;
//!     let (out, _err) = procbox::capture(&mut process)?;
//!     assert_eq!(out, b"hello");
//!     process.wait(Timeout::Infinite)?;
//!     Ok(())
//! }
//! ```

mod clock;
mod error;
mod event;
mod init;
mod options;
mod pipe;
mod process;
mod redirect;
mod sink;
mod spawn;

pub use clock::Timeout;
pub use error::{Error, Result};
pub use event::{poll, Event, EventSource};
pub use options::{Options, RedirectOptions, StopAction, StopActions, StopKind};
pub use process::{Process, StartResult, Status};
pub use redirect::{Redirect, Stream};
pub use sink::{capture, drain};
pub use spawn::{EXIT_SIGKILL, EXIT_SIGTERM, SIGNAL_OFFSET};
