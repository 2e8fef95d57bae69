//! # Dispatcher Module
//!
//! The dispatcher is the bridge between a routed HTTP request and the external
//! process that serves it. One call to [`Dispatcher::dispatch`] is one request.
//!
//! ## Lifecycle
//!
//! 1. **Allocate** an id. On failure the client gets a 500 and nothing else
//!    happens.
//! 2. **Register** a fresh [`Handler`](crate::handler::Handler) in the
//!    [`HandlerRegistry`](crate::registry::HandlerRegistry). A guard removes it
//!    again on every way out of the call.
//! 3. **Capture** (debug routes only): open a stdout and a stderr pipe, start a
//!    relay thread on each read end. If that fails the client gets a 500 and the
//!    process never runs.
//! 4. **Execute** through the [`Spawner`], blocking until the process is gone,
//!    then close the capture write ends so the relays reach end-of-stream.
//! 5. **Finalize**: send the header with the handler's status if nobody has.
//! 6. **Report** an execution error to the log sink. It does not change the
//!    response.
//! 7. **Access log** one record when the request is known.
//! 8. **Deregister** (the guard from step 2).
//!
//! ```rust,ignore
//! use procgate::dispatcher::{Dispatcher, Spawner};
//!
//! let dispatcher = Dispatcher::new(Arc::new(MySpawner));
//! let report = dispatcher.dispatch(route, Some(request_info), Box::new(sink));
//! ```
//!
//! ## Concurrency
//!
//! `dispatch` takes `&self` and is called concurrently from every request
//! coroutine. The registry is the only state shared between requests; a handler
//! is touched only by its own dispatch, its spawner, and whoever looks it up by
//! id while it runs.
//!
//! There is no timeout here: a process that never exits keeps its request (and
//! relays) busy indefinitely.

mod core;

pub use core::{DispatchError, DispatchReport, Dispatcher, Spawner, INTERNAL_ERROR};
