//! Capture pipes for debug routes.
//!
//! A debug dispatch opens one pipe per captured stream. The read end goes to a
//! [`relay`](crate::relay) thread, the write end is lent to the process-execution
//! collaborator and released by the dispatcher once the collaborator returns.
//! Releasing the last write end is what lets the relay see end-of-stream.

use crate::ids::HandlerId;
use crate::log_sink::LogSink;
use std::fmt::{self, Display, Formatter};
use std::io;

pub use std::io::{PipeReader, PipeWriter};

/// Which process stream a pipe carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamName {
    Stdout,
    Stderr,
}

impl StreamName {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StreamName::Stdout => "stdout",
            StreamName::Stderr => "stderr",
        }
    }
}

impl Display for StreamName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Creates unidirectional byte pipes.
pub trait PipeFactory: Send + Sync {
    fn create(&self) -> io::Result<(PipeReader, PipeWriter)>;
}

/// Anonymous OS pipes.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsPipes;

impl PipeFactory for OsPipes {
    fn create(&self) -> io::Result<(PipeReader, PipeWriter)> {
        io::pipe()
    }
}

/// A capture pipe could not be opened.
#[derive(Debug)]
pub struct PipeError {
    pub stream: StreamName,
    pub source: io::Error,
}

impl Display for PipeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to create {} capture pipe: {}",
            self.stream, self.source
        )
    }
}

impl std::error::Error for PipeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Close a pipe end and report the OS result.
#[cfg(unix)]
pub fn release<T>(end: T) -> io::Result<()>
where
    T: Into<std::os::fd::OwnedFd>,
{
    use std::os::fd::IntoRawFd;

    let fd = end.into().into_raw_fd();
    // SAFETY: `fd` was just taken out of an `OwnedFd`, so it is open and owned
    // here alone; nothing else will close it.
    #[allow(unsafe_code)]
    let rc = unsafe { libc::close(fd) };
    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Close a pipe end and report the OS result.
#[cfg(not(unix))]
pub fn release<T>(end: T) -> io::Result<()> {
    drop(end);
    Ok(())
}

/// Write ends lent to the process-execution collaborator for one dispatch.
#[derive(Debug, Clone, Copy)]
pub struct Capture<'a> {
    pub stdout: &'a PipeWriter,
    pub stderr: &'a PipeWriter,
}

/// Owns the write ends of a dispatch's capture pipes until they are released.
///
/// [`release`](CaptureWriters::release) runs right after the collaborator
/// returns; `Drop` covers unwinding. Each end is closed exactly once and close
/// failures go to the log sink, never to the client.
pub struct CaptureWriters<'a> {
    handler_id: HandlerId,
    log: &'a dyn LogSink,
    stdout: Option<PipeWriter>,
    stderr: Option<PipeWriter>,
}

impl<'a> CaptureWriters<'a> {
    #[must_use]
    pub fn new(
        handler_id: HandlerId,
        log: &'a dyn LogSink,
        stdout: PipeWriter,
        stderr: PipeWriter,
    ) -> Self {
        Self {
            handler_id,
            log,
            stdout: Some(stdout),
            stderr: Some(stderr),
        }
    }

    /// Borrow both write ends. `None` once they have been released.
    #[must_use]
    pub fn capture(&self) -> Option<Capture<'_>> {
        match (&self.stdout, &self.stderr) {
            (Some(stdout), Some(stderr)) => Some(Capture { stdout, stderr }),
            _ => None,
        }
    }

    pub fn release(&mut self) {
        for (name, end) in [
            (StreamName::Stdout, self.stdout.take()),
            (StreamName::Stderr, self.stderr.take()),
        ] {
            if let Some(end) = end {
                if let Err(e) = release(end) {
                    self.log.error(
                        self.handler_id,
                        &format!(
                            "failed to close {name} writer for handler {}: {e}",
                            self.handler_id
                        ),
                    );
                }
            }
        }
    }
}

impl Drop for CaptureWriters<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
