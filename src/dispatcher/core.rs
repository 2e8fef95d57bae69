//! Dispatcher core: the per-request lifecycle.

use crate::access_log::AccessRecord;
use crate::handler::{Handler, RequestInfo, ResponseSink, Route};
use crate::ids::{HandlerId, IdError, IdGenerator, UlidGenerator};
use crate::log_sink::{LogSink, TracingLogSink};
use crate::pipes::{Capture, CaptureWriters, OsPipes, PipeError, PipeFactory, StreamName};
use crate::registry::HandlerRegistry;
use crate::relay::{self, RelayHandle, RelayStats};
use crate::runtime_config::RuntimeConfig;
use anyhow::anyhow;
use std::any::Any;
use std::fmt::{self, Display, Formatter};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Status sent when the dispatcher itself cannot serve the request.
pub const INTERNAL_ERROR: u16 = 500;

/// Runs the external process behind a route.
///
/// `spawn` must not return before the process has terminated. When `capture` is
/// given, the process's stdout and stderr must be connected to those write ends,
/// and every duplicate of them the implementation makes must be closed by the
/// time it returns; the dispatcher closes the originals afterwards, which is what
/// ends the relays. Response fields are read and written through `handler`.
pub trait Spawner: Send + Sync {
    fn spawn(&self, handler: &Handler, capture: Option<Capture<'_>>) -> anyhow::Result<()>;
}

impl<F> Spawner for F
where
    F: Fn(&Handler, Option<Capture<'_>>) -> anyhow::Result<()> + Send + Sync,
{
    fn spawn(&self, handler: &Handler, capture: Option<Capture<'_>>) -> anyhow::Result<()> {
        self(handler, capture)
    }
}

/// Why a dispatch did not complete cleanly.
#[derive(Debug)]
pub enum DispatchError {
    /// No id could be allocated; nothing was registered or executed.
    IdAllocation(IdError),
    /// A capture pipe could not be opened; the process never ran.
    Capture(PipeError),
    /// A relay thread could not be started; the process never ran.
    RelaySpawn { stream: StreamName, source: io::Error },
    /// The process-execution collaborator failed. The response was still
    /// finalized.
    Execution(anyhow::Error),
}

impl Display for DispatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::IdAllocation(e) => write!(f, "{e}"),
            DispatchError::Capture(e) => write!(f, "{e}"),
            DispatchError::RelaySpawn { stream, source } => {
                write!(f, "failed to start {stream} relay: {source}")
            }
            DispatchError::Execution(e) => write!(f, "process execution failed: {e:#}"),
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DispatchError::IdAllocation(e) => Some(e),
            DispatchError::Capture(e) => Some(e),
            DispatchError::RelaySpawn { source, .. } => Some(source),
            DispatchError::Execution(e) => Some(&**e),
        }
    }
}

/// Result of one dispatch, as seen after the handler was deregistered.
#[derive(Debug)]
pub struct DispatchReport {
    /// `None` only when id allocation failed.
    pub handler_id: Option<HandlerId>,
    /// Status the handler ended with (what the access log reports).
    pub status: u16,
    pub sent_bytes: u64,
    pub error: Option<DispatchError>,
    /// Relays started for this dispatch; empty for non-capturing routes.
    pub relays: Vec<RelayHandle>,
}

impl DispatchReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Wait for every relay to drain its stream.
    pub fn join_relays(&mut self) -> Vec<(StreamName, RelayStats)> {
        self.relays
            .drain(..)
            .filter_map(|relay| {
                let stream = relay.stream();
                match relay.join() {
                    Ok(stats) => Some((stream, stats)),
                    Err(_) => {
                        warn!(stream = %stream, "Relay thread panicked");
                        None
                    }
                }
            })
            .collect()
    }
}

/// Keeps a handler registered for as long as it lives.
struct Registration<'a> {
    registry: &'a HandlerRegistry,
    id: HandlerId,
}

impl<'a> Registration<'a> {
    fn new(registry: &'a HandlerRegistry, handler: Arc<Handler>) -> Self {
        let id = handler.id();
        registry.add(handler);
        Self { registry, id }
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if self.registry.remove(&self.id).is_none() {
            warn!(handler_id = %self.id, "Handler was already deregistered");
        }
    }
}

/// Turns routed requests into process invocations.
///
/// Cheap to clone; clones share the registry, spawner and sinks.
#[derive(Clone)]
pub struct Dispatcher {
    ids: Arc<dyn IdGenerator>,
    registry: Arc<HandlerRegistry>,
    spawner: Arc<dyn Spawner>,
    pipes: Arc<dyn PipeFactory>,
    log: Arc<dyn LogSink>,
    config: RuntimeConfig,
}

impl Dispatcher {
    /// A dispatcher on the process-wide registry and id generator, OS pipes,
    /// `tracing` output and configuration from the environment.
    #[must_use]
    pub fn new(spawner: Arc<dyn Spawner>) -> Self {
        Self {
            ids: UlidGenerator::shared(),
            registry: HandlerRegistry::global(),
            spawner,
            pipes: Arc::new(OsPipes),
            log: Arc::new(TracingLogSink),
            config: RuntimeConfig::from_env(),
        }
    }

    #[must_use]
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    #[must_use]
    pub fn with_registry(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn with_pipe_factory(mut self, pipes: Arc<dyn PipeFactory>) -> Self {
        self.pipes = pipes;
        self
    }

    #[must_use]
    pub fn with_log_sink(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Serve one request on `route`.
    ///
    /// Blocks until the process has terminated. The handler is registered for the
    /// whole call and deregistered on every way out, unwinding included. Exactly
    /// one header is sent on `sink` unless the spawner sent it already.
    pub fn dispatch(
        &self,
        route: Arc<Route>,
        request: Option<RequestInfo>,
        mut sink: Box<dyn ResponseSink>,
    ) -> DispatchReport {
        let id = match self.ids.generate() {
            Ok(id) => id,
            Err(e) => {
                error!(route = %route.id, error = %e, "Handler id allocation failed");
                sink.send_header(INTERNAL_ERROR);
                return DispatchReport {
                    handler_id: None,
                    status: INTERNAL_ERROR,
                    sent_bytes: 0,
                    error: Some(DispatchError::IdAllocation(e)),
                    relays: Vec::new(),
                };
            }
        };

        let handler = Arc::new(Handler::new(id, route, request, sink));
        let _registration = Registration::new(&self.registry, Arc::clone(&handler));

        let capture = self.config.capture.captures(handler.route().debug);
        debug!(
            handler_id = %id,
            route = %handler.route().id,
            capture = capture,
            "Dispatch start"
        );

        let mut relays = Vec::new();
        let executed = if capture {
            match self.open_capture(id, &mut relays) {
                Ok(mut writers) => {
                    let result = self.execute(&handler, writers.capture());
                    writers.release();
                    result
                }
                Err(e) => {
                    self.log.error(id, &format!("handler {id}: {e}"));
                    handler.set_status(INTERNAL_ERROR);
                    handler.send_header();
                    self.log_access(&handler);
                    return Self::report(&handler, Some(e), relays);
                }
            }
        } else {
            self.execute(&handler, None)
        };

        handler.send_header();

        let error = executed.err().map(|e| {
            self.log
                .error(id, &format!("handler {id}: process execution failed: {e:#}"));
            DispatchError::Execution(e)
        });

        self.log_access(&handler);
        Self::report(&handler, error, relays)
    }

    /// Open both capture pipes and start a relay on each read end.
    ///
    /// Pipes are opened before any relay starts, so a failure on the second pipe
    /// leaves no relay behind.
    fn open_capture(
        &self,
        id: HandlerId,
        relays: &mut Vec<RelayHandle>,
    ) -> Result<CaptureWriters<'_>, DispatchError> {
        let (stdout_r, stdout_w) = self.pipes.create().map_err(|source| {
            DispatchError::Capture(PipeError {
                stream: StreamName::Stdout,
                source,
            })
        })?;
        let (stderr_r, stderr_w) = self.pipes.create().map_err(|source| {
            DispatchError::Capture(PipeError {
                stream: StreamName::Stderr,
                source,
            })
        })?;

        let writers = CaptureWriters::new(id, self.log.as_ref(), stdout_w, stderr_w);
        for (stream, reader) in [(StreamName::Stdout, stdout_r), (StreamName::Stderr, stderr_r)] {
            let relay = relay::spawn(
                id,
                stream,
                reader,
                Arc::clone(&self.log),
                self.config.relay_stack_size,
            )
            .map_err(|source| DispatchError::RelaySpawn { stream, source })?;
            relays.push(relay);
        }
        Ok(writers)
    }

    /// Run the spawner, turning a panic into an execution error.
    fn execute(&self, handler: &Handler, capture: Option<Capture<'_>>) -> anyhow::Result<()> {
        let start = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.spawner.spawn(handler, capture)
        }))
        .unwrap_or_else(|panic| {
            Err(anyhow!(
                "process execution panicked: {}",
                panic_message(panic.as_ref())
            ))
        });

        info!(
            handler_id = %handler.id(),
            route = %handler.route().id,
            execution_time_ms = start.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Process execution complete"
        );
        result
    }

    fn log_access(&self, handler: &Handler) {
        if let Some(record) = AccessRecord::from_handler(handler) {
            self.log.access(&record);
        }
    }

    fn report(
        handler: &Handler,
        error: Option<DispatchError>,
        relays: Vec<RelayHandle>,
    ) -> DispatchReport {
        DispatchReport {
            handler_id: Some(handler.id()),
            status: handler.status(),
            sent_bytes: handler.sent_bytes(),
            error,
            relays,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default, Clone)]
    struct Wire(Arc<Mutex<Vec<u16>>>);

    impl ResponseSink for Wire {
        fn send_header(&mut self, status: u16) {
            self.0.lock().push(status);
        }

        fn write_body(&mut self, chunk: &[u8]) -> io::Result<usize> {
            Ok(chunk.len())
        }
    }

    struct Quiet;

    impl LogSink for Quiet {
        fn line(&self, _handler_id: HandlerId, _stream: StreamName, _record: &str) {}
        fn error(&self, _handler_id: HandlerId, _message: &str) {}
        fn access(&self, _record: &AccessRecord) {}
    }

    struct Panics;

    impl Spawner for Panics {
        fn spawn(&self, _handler: &Handler, _capture: Option<Capture<'_>>) -> anyhow::Result<()> {
            panic!("boom");
        }
    }

    fn dispatcher(spawner: Arc<dyn Spawner>) -> Dispatcher {
        Dispatcher::new(spawner)
            .with_registry(Arc::new(HandlerRegistry::new()))
            .with_log_sink(Arc::new(Quiet))
            .with_config(RuntimeConfig::default())
    }

    #[test]
    fn test_panicking_spawner_is_contained() {
        let d = dispatcher(Arc::new(Panics));
        let wire = Wire::default();
        let report = d.dispatch(Arc::new(Route::default()), None, Box::new(wire.clone()));

        assert!(matches!(report.error, Some(DispatchError::Execution(_))));
        assert!(report
            .error
            .as_ref()
            .map(|e| e.to_string().contains("boom"))
            .unwrap_or(false));
        assert_eq!(*wire.0.lock(), vec![200]);
        assert!(d.registry().is_empty());
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic payload");
    }

    #[test]
    fn test_display_of_errors() {
        let e = DispatchError::RelaySpawn {
            stream: StreamName::Stderr,
            source: io::Error::new(io::ErrorKind::Other, "no threads"),
        };
        assert_eq!(e.to_string(), "failed to start stderr relay: no threads");
        let e = DispatchError::Execution(anyhow!("exit status 3"));
        assert_eq!(e.to_string(), "process execution failed: exit status 3");
    }
}
