//! Where dispatch diagnostics go.
//!
//! The dispatcher and the stream relays never talk to `tracing` directly; they
//! go through a [`LogSink`] so the destination can be swapped (and recorded in
//! tests). [`TracingLogSink`] is the production sink.

use crate::access_log::AccessRecord;
use crate::ids::HandlerId;
use crate::pipes::StreamName;
use tracing::{error, info};

pub trait LogSink: Send + Sync {
    /// One relayed line of process output. `record` is the full tagged form,
    /// `"<handler id> <stream>: <line>"`.
    fn line(&self, handler_id: HandlerId, stream: StreamName, record: &str);

    /// A non-fatal error of one dispatch that did not reach the client.
    fn error(&self, handler_id: HandlerId, message: &str);

    /// One access-log record per completed request.
    fn access(&self, record: &AccessRecord);
}

/// Forwards everything to `tracing` under the `procgate::*` targets.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn line(&self, handler_id: HandlerId, stream: StreamName, record: &str) {
        info!(
            target: "procgate::relay",
            handler_id = %handler_id,
            stream = %stream,
            "{record}"
        );
    }

    fn error(&self, handler_id: HandlerId, message: &str) {
        error!(
            target: "procgate::dispatch",
            handler_id = %handler_id,
            error = %message,
            "{message}"
        );
    }

    fn access(&self, record: &AccessRecord) {
        info!(
            target: "procgate::access",
            remote_addr = %record.remote_addr,
            handler_id = %record.handler_id,
            user = %record.user,
            method = %record.method,
            uri = %record.uri,
            proto = %record.proto,
            status = record.status,
            sent_bytes = record.sent_bytes,
            referer = %record.referer,
            user_agent = %record.user_agent,
            "{record}"
        );
    }
}
