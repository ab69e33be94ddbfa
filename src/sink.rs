//! Convenience helpers that read a child's output streams to completion.

use crate::clock::Timeout;
use crate::error::{Error, Result};
use crate::event::{poll, Event, EventSource};
use crate::process::Process;
use crate::redirect::Stream;

/// Reads standard output and error until both are closed, handing each
/// chunk to `sink` together with the stream it came from. Returns
/// `TimedOut` if the process deadline passes first.
pub fn drain<F>(process: &mut Process, mut sink: F) -> Result<()>
where
    F: FnMut(Stream, &[u8]) -> Result<()>,
{
    let mut buffer = [0u8; 4096];

    loop {
        let mut interests = Event::NONE;
        if process.event_fd(Event::OUT).is_some() {
            interests |= Event::OUT;
        }
        if process.event_fd(Event::ERR).is_some() {
            interests |= Event::ERR;
        }
        if interests.is_empty() {
            return Ok(());
        }

        let events = {
            let mut sources = [EventSource::new(process, interests)];
            poll(&mut sources, Timeout::Infinite)?;
            sources[0].events
        };

        if events.contains(Event::DEADLINE) {
            return Err(Error::TimedOut);
        }

        for (event, stream) in [(Event::OUT, Stream::Out), (Event::ERR, Stream::Err)] {
            if events.contains(event) {
                match process.read(stream, &mut buffer) {
                    Ok(n) => sink(stream, &buffer[..n])?,
                    // End-of-stream; the pipe is gone and the loop moves
                    // on to whatever is left.
                    Err(Error::BrokenPipe) => {}
                    Err(error) => return Err(error),
                }
            }
        }
    }
}

/// Drains both streams into byte buffers, returned as
/// `(standard output, standard error)`.
pub fn capture(process: &mut Process) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    let mut err = Vec::new();

    drain(process, |stream, chunk| {
        match stream {
            Stream::Out => out.extend_from_slice(chunk),
            Stream::Err => err.extend_from_slice(chunk),
            Stream::In => {}
        }
        Ok(())
    })?;

    Ok((out, err))
}
