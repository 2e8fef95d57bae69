//! # procgate
//!
//! **procgate** is the request-dispatch bridge of an HTTP gateway that serves
//! routes by running external processes. For every routed request it creates a
//! short-lived handler, publishes it in a registry under a unique id, runs the
//! route's process, optionally relays the process's stdout/stderr into the log,
//! finalizes the HTTP response and removes the handler again, whatever happened
//! along the way.
//!
//! ## Architecture
//!
//! - **[`ids`]** - ULID handler ids from a monotonic generator
//! - **[`handler`]** - Route shape, inbound request view and per-request handler
//! - **[`registry`]** - Concurrent id → handler map of in-flight requests
//! - **[`pipes`]** - Capture pipes and their guaranteed release
//! - **[`relay`]** - Threads that turn captured output into log lines
//! - **[`access_log`]** - One combined-format record per request
//! - **[`log_sink`]** - Destination for relayed lines, errors and access records
//! - **[`dispatcher`]** - The per-request lifecycle
//! - **[`server`]** - `may_minihttp` adapter in front of the dispatcher
//! - **[`runtime_config`]** / **[`logging`]** - Environment configuration and
//!   `tracing` setup
//!
//! Routing, route storage and the mechanics of starting a process are not part
//! of this crate: they plug in through [`server::RouteResolver`] and
//! [`dispatcher::Spawner`].
//!
//! ### Request Handling Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Server as GatewayService
//!     participant Dispatcher
//!     participant Registry as HandlerRegistry
//!     participant Relay as Relays (debug only)
//!     participant Spawner
//!     participant Log as LogSink
//!
//!     Server->>Dispatcher: dispatch(route, request, sink)
//!     Dispatcher->>Dispatcher: allocate HandlerId
//!     alt id allocation fails
//!         Dispatcher-->>Server: 500
//!     end
//!     Dispatcher->>Registry: add(handler)
//!     opt route.debug
//!         Dispatcher->>Relay: open stdout/stderr pipes, start relays
//!     end
//!     Dispatcher->>Spawner: spawn(handler, capture)
//!     Spawner-->>Relay: process output
//!     Relay->>Log: "<id> stdout: <line>"
//!     Spawner-->>Dispatcher: Ok / Err
//!     Dispatcher->>Relay: close write ends (end-of-stream)
//!     Dispatcher->>Dispatcher: send header if still pending
//!     Dispatcher->>Log: execution error, access record
//!     Dispatcher->>Registry: remove(id)
//!     Dispatcher-->>Server: DispatchReport
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use procgate::dispatcher::Dispatcher;
//! use procgate::server::GatewayService;
//! use std::sync::Arc;
//!
//! procgate::logging::init_logging_with_config(&procgate::logging::LogConfig::from_env())?;
//! let config = procgate::runtime_config::RuntimeConfig::from_env();
//! config.configure_may();
//!
//! let dispatcher = Dispatcher::new(Arc::new(MySpawner)).with_config(config);
//! let service = GatewayService::new(Arc::new(MyRoutes), dispatcher);
//! service.serve("0.0.0.0:8080")?.join();
//! ```
//!
//! ## Runtime Considerations
//!
//! The HTTP side runs on `may` coroutines. A dispatch blocks for as long as its
//! process runs, and relays block on pipe reads, so both get their own OS
//! threads. The connection coroutine parks on a `may` channel until its
//! dispatch thread reports back, leaving the scheduler workers free for other
//! requests.

pub mod access_log;
pub mod dispatcher;
pub mod handler;
pub mod ids;
pub mod log_sink;
pub mod logging;
pub mod pipes;
pub mod registry;
pub mod relay;
pub mod runtime_config;
pub mod server;

pub use access_log::AccessRecord;
pub use dispatcher::{DispatchError, DispatchReport, Dispatcher, Spawner};
pub use handler::{Handler, RequestInfo, ResponseSink, Route};
pub use ids::{HandlerId, IdError, IdGenerator, UlidGenerator};
pub use log_sink::{LogSink, TracingLogSink};
pub use pipes::{Capture, PipeFactory};
pub use registry::{HandlerRegistry, RegistryStats};
