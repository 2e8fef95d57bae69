//! Stream log relays.
//!
//! A relay drains the read end of a capture pipe on its own thread and forwards
//! every line to the log sink as `"<handler id> <stream>: <line>"`. It stops at
//! end-of-stream (all write ends released) or on the first read error, and always
//! closes its read end before exiting.
//!
//! Relays run on OS threads rather than `may` coroutines: pipe reads block the
//! calling thread, which would stall a coroutine scheduler worker.

use crate::ids::HandlerId;
use crate::log_sink::LogSink;
use crate::pipes::{self, PipeReader, StreamName};
use std::io::{self, BufRead, BufReader, Read};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// What a relay saw before it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayStats {
    /// Lines forwarded to the sink.
    pub lines: usize,
    /// The relay stopped on a read error instead of end-of-stream.
    pub read_error: bool,
    /// Records that were cut at [`MAX_LINE_BYTES`] before their line ended.
    pub split_lines: usize,
}

/// A running relay.
#[derive(Debug)]
pub struct RelayHandle {
    stream: StreamName,
    handle: JoinHandle<RelayStats>,
}

impl RelayHandle {
    #[must_use]
    pub fn stream(&self) -> StreamName {
        self.stream
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the relay to reach end-of-stream.
    pub fn join(self) -> thread::Result<RelayStats> {
        self.handle.join()
    }
}

/// Start a relay thread for one capture pipe.
///
/// # Errors
///
/// Returns the OS error if the thread cannot be spawned; the read end is closed
/// in that case.
pub fn spawn(
    handler_id: HandlerId,
    stream: StreamName,
    reader: PipeReader,
    log: Arc<dyn LogSink>,
    stack_size: usize,
) -> io::Result<RelayHandle> {
    let handle = thread::Builder::new()
        .name(format!("relay-{stream}"))
        .stack_size(stack_size)
        .spawn(move || {
            let stats = relay_lines(handler_id, stream, BufReader::new(&reader), log.as_ref());
            if let Err(e) = pipes::release(reader) {
                log.error(
                    handler_id,
                    &format!("failed to close {stream} stream for handler {handler_id}: {e}"),
                );
            }
            debug!(
                handler_id = %handler_id,
                stream = %stream,
                lines = stats.lines,
                "Relay finished"
            );
            stats
        })?;
    Ok(RelayHandle { stream, handle })
}

/// Longest record a relay forwards, in bytes of process output. Longer lines
/// are split into consecutive records of at most this size.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Forward every line of `reader` to `log` until end-of-stream or a read error.
///
/// Line terminators (`\n` or `\r\n`) are stripped; a final line without a
/// terminator is still forwarded. Invalid UTF-8 is replaced, not rejected. At
/// most [`MAX_LINE_BYTES`] are buffered at a time.
pub fn relay_lines<R: BufRead>(
    handler_id: HandlerId,
    stream: StreamName,
    mut reader: R,
    log: &dyn LogSink,
) -> RelayStats {
    let mut stats = RelayStats::default();
    let mut buf = Vec::with_capacity(256);
    // The previous record was cut at the limit, so a lone terminator that
    // follows it ends that line rather than starting an empty one.
    let mut continued = false;
    loop {
        buf.clear();
        match (&mut reader)
            .take(MAX_LINE_BYTES as u64)
            .read_until(b'\n', &mut buf)
        {
            Ok(0) => break,
            Ok(_) => {
                let terminated = buf.last() == Some(&b'\n');
                if terminated {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                    if continued && buf.is_empty() {
                        continued = false;
                        continue;
                    }
                }
                continued = !terminated && buf.len() == MAX_LINE_BYTES;
                if continued {
                    stats.split_lines += 1;
                }

                let line = String::from_utf8_lossy(&buf);
                log.line(handler_id, stream, &format!("{handler_id} {stream}: {line}"));
                stats.lines += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(
                    handler_id = %handler_id,
                    stream = %stream,
                    error = %e,
                    "Relay read failed"
                );
                stats.read_error = true;
                break;
            }
        }
    }
    stats
}
