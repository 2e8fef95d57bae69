//! Access-log records.
//!
//! One record per completed request, in the combined-log field order:
//! remote address, handler id, a reserved `-` field, method, URI, protocol,
//! status, bytes sent, referer, user agent.

use crate::handler::Handler;
use serde::Serialize;
use std::fmt::{self, Display, Formatter};

/// Value of the reserved third field. Nothing fills it yet.
pub const RESERVED_FIELD: &str = "-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessRecord {
    pub remote_addr: String,
    pub handler_id: String,
    pub user: String,
    pub method: String,
    pub uri: String,
    pub proto: String,
    pub status: u16,
    pub sent_bytes: u64,
    pub referer: String,
    pub user_agent: String,
}

impl AccessRecord {
    /// Build the record for a finished handler. `None` when the handler has no
    /// inbound request attached.
    #[must_use]
    pub fn from_handler(handler: &Handler) -> Option<Self> {
        let req = handler.request()?;
        Some(Self {
            remote_addr: req.remote_addr.clone().unwrap_or_else(|| "-".to_string()),
            handler_id: handler.id().to_string(),
            user: RESERVED_FIELD.to_string(),
            method: req.method.to_string(),
            uri: req.uri.clone(),
            proto: req.proto().to_string(),
            status: handler.status(),
            sent_bytes: handler.sent_bytes(),
            referer: req.referer().to_string(),
            user_agent: req.user_agent().to_string(),
        })
    }

    /// The fields in log order, rendered as text.
    #[must_use]
    pub fn fields(&self) -> [String; 10] {
        [
            self.remote_addr.clone(),
            self.handler_id.clone(),
            self.user.clone(),
            self.method.clone(),
            self.uri.clone(),
            self.proto.clone(),
            self.status.to_string(),
            self.sent_bytes.to_string(),
            self.referer.clone(),
            self.user_agent.clone(),
        ]
    }
}

impl Display for AccessRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} \"{} {} {}\" {} {} \"{}\" \"{}\"",
            self.remote_addr,
            self.handler_id,
            self.user,
            self.method,
            self.uri,
            self.proto,
            self.status,
            self.sent_bytes,
            self.referer,
            self.user_agent
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{RequestInfo, ResponseSink, Route};
    use crate::ids::{IdGenerator, UlidGenerator};
    use http::Method;
    use std::io;
    use std::sync::Arc;

    struct Discard;

    impl ResponseSink for Discard {
        fn send_header(&mut self, _status: u16) {}

        fn write_body(&mut self, chunk: &[u8]) -> io::Result<usize> {
            Ok(chunk.len())
        }
    }

    fn handler(request: Option<RequestInfo>) -> Handler {
        Handler::new(
            UlidGenerator::new().generate().unwrap(),
            Arc::new(Route::default()),
            request,
            Box::new(Discard),
        )
    }

    #[test]
    fn test_no_request_no_record() {
        assert!(AccessRecord::from_handler(&handler(None)).is_none());
    }

    #[test]
    fn test_field_order_and_defaults() {
        let h = handler(Some(
            RequestInfo::new(Method::GET, "/hello?who=me").with_remote_addr("10.0.0.1:5555"),
        ));
        h.set_status(201);
        h.write_body(b"12345").unwrap();

        let record = AccessRecord::from_handler(&h).unwrap();
        assert_eq!(
            record.fields(),
            [
                "10.0.0.1:5555".to_string(),
                h.id().to_string(),
                "-".to_string(),
                "GET".to_string(),
                "/hello?who=me".to_string(),
                "HTTP/1.1".to_string(),
                "201".to_string(),
                "5".to_string(),
                String::new(),
                String::new(),
            ]
        );
    }

    #[test]
    fn test_display_combined_format() {
        let h = handler(Some(
            RequestInfo::new(Method::POST, "/p")
                .with_remote_addr("127.0.0.1")
                .with_header("referer", "http://r/")
                .with_header("user-agent", "ua/1"),
        ));
        let record = AccessRecord::from_handler(&h).unwrap();
        assert_eq!(
            record.to_string(),
            format!("127.0.0.1 {} - \"POST /p HTTP/1.1\" 200 0 \"http://r/\" \"ua/1\"", h.id())
        );
    }

    #[test]
    fn test_missing_remote_addr_serializes_as_dash() {
        let h = handler(Some(RequestInfo::new(Method::DELETE, "/items/7")));
        let record = AccessRecord::from_handler(&h).unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["remote_addr"], "-");
        assert_eq!(json["method"], "DELETE");
        assert_eq!(json["status"], 200);
    }
}
