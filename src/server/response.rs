use crate::handler::ResponseSink;
use may_minihttp::Response;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;

/// Reason phrase for a status code, `"Unknown"` for unregistered codes.
#[must_use]
pub fn status_reason(status: u16) -> &'static str {
    http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown")
}

#[derive(Debug, Default)]
struct Buffered {
    status: Option<u16>,
    body: Vec<u8>,
}

/// Response sink that buffers status and body until the dispatch is over.
///
/// `may_minihttp` writes the whole response after the service returns, so the
/// handler writes into this buffer and [`write_to`](BufferedResponse::write_to)
/// copies it out. Clones share the buffer.
#[derive(Debug, Default, Clone)]
pub struct BufferedResponse {
    inner: Arc<Mutex<Buffered>>,
}

impl BufferedResponse {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The status sent by the handler, if a header went out.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.inner.lock().status
    }

    #[must_use]
    pub fn body(&self) -> Vec<u8> {
        self.inner.lock().body.clone()
    }

    /// Move the buffered status and body into a minihttp response. A response
    /// whose header never went out is sent as 200.
    pub fn write_to(&self, res: &mut Response) {
        let mut buffered = self.inner.lock();
        let status = buffered.status.unwrap_or(200);
        res.status_code(status as usize, status_reason(status));
        res.body_vec(std::mem::take(&mut buffered.body));
    }
}

impl ResponseSink for BufferedResponse {
    fn send_header(&mut self, status: u16) {
        self.inner.lock().status = Some(status);
    }

    fn write_body(&mut self, chunk: &[u8]) -> io::Result<usize> {
        self.inner.lock().body.extend_from_slice(chunk);
        Ok(chunk.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_reason() {
        assert_eq!(status_reason(200), "OK");
        assert_eq!(status_reason(201), "Created");
        assert_eq!(status_reason(404), "Not Found");
        assert_eq!(status_reason(500), "Internal Server Error");
        assert_eq!(status_reason(599), "Unknown");
    }

    #[test]
    fn test_buffered_response_shares_state() {
        let buffered = BufferedResponse::new();
        let mut sink: Box<dyn ResponseSink> = Box::new(buffered.clone());
        assert_eq!(buffered.status(), None);
        sink.send_header(202);
        sink.write_body(b"queued").unwrap();
        assert_eq!(buffered.status(), Some(202));
        assert_eq!(buffered.body(), b"queued");
    }
}
