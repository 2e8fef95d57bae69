use super::response::{status_reason, BufferedResponse};
use crate::dispatcher::{Dispatcher, INTERNAL_ERROR};
use crate::handler::{RequestInfo, Route};
use http::header::HeaderMap;
use http::{Method, Version};
use may::coroutine::JoinHandle;
use may::sync::mpsc;
use may_minihttp::{HttpServer, HttpService, Request, Response};
use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Picks the route for a request. Matching lives outside this crate.
pub trait RouteResolver: Send + Sync {
    fn resolve(&self, method: &Method, path: &str) -> Option<Arc<Route>>;
}

/// `may_minihttp` service that hands every resolved request to a [`Dispatcher`].
///
/// A dispatch blocks for as long as its process runs, so it never runs on the
/// connection coroutine: each one gets its own OS thread and the coroutine
/// parks on a channel until the response is ready.
pub struct GatewayService<R> {
    pub resolver: Arc<R>,
    pub dispatcher: Dispatcher,
}

impl<R> Clone for GatewayService<R> {
    fn clone(&self) -> Self {
        Self {
            resolver: Arc::clone(&self.resolver),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<R: RouteResolver + 'static> GatewayService<R> {
    #[must_use]
    pub fn new(resolver: Arc<R>, dispatcher: Dispatcher) -> Self {
        Self {
            resolver,
            dispatcher,
        }
    }

    /// Bind `addr` and serve on the `may` runtime.
    ///
    /// # Errors
    ///
    /// Fails if `addr` does not resolve or cannot be bound.
    pub fn serve<A: ToSocketAddrs>(self, addr: A) -> io::Result<RunningGateway> {
        let addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing")
        })?;
        let server = HttpServer(self).start(addr)?;
        info!(%addr, "Gateway listening");
        Ok(RunningGateway { addr, server })
    }

    /// Run one dispatch on a dedicated thread and wait for it without holding
    /// a scheduler worker. `None` when the thread could not be started or
    /// died before reporting.
    fn dispatch_detached(&self, route: Arc<Route>, info: RequestInfo) -> Option<BufferedResponse> {
        let response = BufferedResponse::new();
        let sink = response.clone();
        let dispatcher = self.dispatcher.clone();
        let route_id = route.id.clone();
        let (done_tx, done_rx) = mpsc::channel();

        let spawned = thread::Builder::new()
            .name(format!("dispatch-{route_id}"))
            .stack_size(dispatcher.config().dispatch_stack_size)
            .spawn(move || {
                // Relays are left to finish on their own.
                let report = dispatcher.dispatch(route, Some(info), Box::new(sink));
                if done_tx.send(report.status).is_err() {
                    warn!(handler_id = ?report.handler_id, "Connection gone before dispatch finished");
                }
            });
        if let Err(e) = spawned {
            error!(route = %route_id, error = %e, "Failed to start dispatch thread");
            return None;
        }

        match done_rx.recv() {
            Ok(_) => Some(response),
            Err(_) => {
                error!(route = %route_id, "Dispatch thread exited without a result");
                None
            }
        }
    }
}

/// A gateway accepting connections.
pub struct RunningGateway {
    addr: SocketAddr,
    server: JoinHandle<()>,
}

impl RunningGateway {
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Block until a TCP connection to the gateway succeeds.
    ///
    /// # Errors
    ///
    /// `TimedOut` if it does not accept within `timeout`.
    pub fn wait_ready(&self, timeout: Duration) -> io::Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("gateway on {} not accepting", self.addr),
                ));
            }
            match TcpStream::connect_timeout(&self.addr, left.min(Duration::from_millis(50))) {
                Ok(_) => return Ok(()),
                Err(_) => thread::sleep(Duration::from_millis(5)),
            }
        }
    }

    /// Stop accepting and wait for the accept loop to end. Dispatches already
    /// running finish on their own threads.
    pub fn shutdown(self) {
        // SAFETY: cancelling a may coroutine unwinds it at its next yield
        // point. The accept loop owns no state that outlives it and this is
        // the only handle to it.
        #[allow(unsafe_code)]
        unsafe {
            self.server.coroutine().cancel();
        }
        let _ = self.server.join();
        info!(addr = %self.addr, "Gateway stopped");
    }

    /// Serve until the accept loop ends.
    ///
    /// # Errors
    ///
    /// Returns the panic payload if the accept loop panicked.
    pub fn join(self) -> thread::Result<()> {
        self.server.join()
    }
}

/// Client address announced by a reverse proxy: the first `X-Forwarded-For`
/// entry, else `X-Real-IP`.
#[must_use]
pub fn forwarded_client(headers: &HeaderMap) -> Option<String> {
    let first_hop = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next());
    let real_ip = headers.get("x-real-ip").and_then(|v| v.to_str().ok());

    [first_hop, real_ip]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// Build a [`RequestInfo`] from a minihttp request, consuming its body.
///
/// `may_minihttp` does not expose the peer address, so the remote address is
/// taken from proxy headers when present.
///
/// # Errors
///
/// `InvalidInput` for a method token `http` rejects; I/O errors from reading
/// the body.
pub fn request_info(req: Request) -> io::Result<RequestInfo> {
    let method = Method::from_bytes(req.method().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let version = match req.version() {
        0 => Version::HTTP_10,
        _ => Version::HTTP_11,
    };
    let mut info = RequestInfo::new(method, req.path()).with_version(version);
    for header in req.headers() {
        info = info.with_raw_header(header.name, header.value);
    }
    if let Some(client) = forwarded_client(&info.headers) {
        info = info.with_remote_addr(client);
    }

    let mut body = Vec::new();
    req.body().read_to_end(&mut body)?;
    Ok(info.with_body(body))
}

impl<R: RouteResolver + 'static> HttpService for GatewayService<R> {
    fn call(&mut self, req: Request, res: &mut Response) -> io::Result<()> {
        let info = match request_info(req) {
            Ok(info) => info,
            Err(e) => {
                warn!(error = %e, "Rejected malformed request");
                res.status_code(400, status_reason(400));
                return Ok(());
            }
        };

        let path = info.uri.split('?').next().unwrap_or("/").to_string();
        let Some(route) = self.resolver.resolve(&info.method, &path) else {
            debug!(method = %info.method, path = %path, "No route matched");
            res.status_code(404, status_reason(404));
            return Ok(());
        };

        match self.dispatch_detached(route, info) {
            Some(response) => response.write_to(res),
            None => {
                res.status_code(INTERNAL_ERROR as usize, status_reason(INTERNAL_ERROR));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_forwarded_for_first_hop_wins() {
        let map = headers(&[
            ("x-forwarded-for", " 203.0.113.9 , 10.0.0.2"),
            ("x-real-ip", "10.0.0.2"),
        ]);
        assert_eq!(forwarded_client(&map).as_deref(), Some("203.0.113.9"));
    }

    #[test]
    fn test_real_ip_fallback() {
        let map = headers(&[("x-forwarded-for", " "), ("x-real-ip", "198.51.100.4")]);
        assert_eq!(forwarded_client(&map).as_deref(), Some("198.51.100.4"));
    }

    #[test]
    fn test_no_proxy_headers() {
        assert_eq!(forwarded_client(&HeaderMap::new()), None);
    }
}
