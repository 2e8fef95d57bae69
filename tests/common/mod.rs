#![allow(dead_code)]

pub mod fakes {
    use anyhow::{bail, Context};
    use parking_lot::Mutex;
    use procgate::dispatcher::Spawner;
    use procgate::pipes::{OsPipes, PipeReader, PipeWriter, StreamName};
    use procgate::{
        AccessRecord, Capture, Handler, HandlerId, HandlerRegistry, LogSink, PipeFactory,
        ResponseSink,
    };
    use std::io::{self, Write};
    use std::process::{Command, Stdio};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Log sink that keeps everything it is given.
    #[derive(Default)]
    pub struct RecordingLog {
        pub lines: Mutex<Vec<String>>,
        pub errors: Mutex<Vec<String>>,
        pub access: Mutex<Vec<AccessRecord>>,
    }

    impl RecordingLog {
        pub fn lines_with_prefix(&self, prefix: &str) -> Vec<String> {
            self.lines
                .lock()
                .iter()
                .filter(|l| l.starts_with(prefix))
                .cloned()
                .collect()
        }
    }

    impl LogSink for RecordingLog {
        fn line(&self, _handler_id: HandlerId, _stream: StreamName, record: &str) {
            self.lines.lock().push(record.to_string());
        }

        fn error(&self, _handler_id: HandlerId, message: &str) {
            self.errors.lock().push(message.to_string());
        }

        fn access(&self, record: &AccessRecord) {
            self.access.lock().push(record.clone());
        }
    }

    #[derive(Debug, Default)]
    pub struct Wire {
        pub headers: Vec<u16>,
        pub body: Vec<u8>,
    }

    /// Response sink whose wire traffic can be inspected after the dispatch.
    #[derive(Clone, Default)]
    pub struct RecordingResponse(pub Arc<Mutex<Wire>>);

    impl RecordingResponse {
        pub fn headers(&self) -> Vec<u16> {
            self.0.lock().headers.clone()
        }

        pub fn body(&self) -> Vec<u8> {
            self.0.lock().body.clone()
        }
    }

    impl ResponseSink for RecordingResponse {
        fn send_header(&mut self, status: u16) {
            self.0.lock().headers.push(status);
        }

        fn write_body(&mut self, chunk: &[u8]) -> io::Result<usize> {
            self.0.lock().body.extend_from_slice(chunk);
            Ok(chunk.len())
        }
    }

    /// OS pipes, except that call number `fail_on` (1-based) fails.
    pub struct FailingPipes {
        pub fail_on: usize,
        pub calls: AtomicUsize,
    }

    impl FailingPipes {
        pub fn new(fail_on: usize) -> Self {
            Self {
                fail_on,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl PipeFactory for FailingPipes {
        fn create(&self) -> io::Result<(PipeReader, PipeWriter)> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.fail_on {
                return Err(io::Error::new(io::ErrorKind::Other, "too many open files"));
            }
            OsPipes.create()
        }
    }

    /// In-process stand-in for a spawned process.
    #[derive(Default)]
    pub struct ScriptedSpawner {
        pub status: Option<u16>,
        pub body: Option<Vec<u8>>,
        pub stdout_lines: Vec<String>,
        pub stderr_lines: Vec<String>,
        pub fail_with: Option<String>,
        /// Registry to check the handler is visible in while running.
        pub registry: Option<Arc<HandlerRegistry>>,
        pub was_registered: AtomicBool,
        pub saw_capture: AtomicBool,
        pub calls: AtomicUsize,
    }

    impl Spawner for ScriptedSpawner {
        fn spawn(&self, handler: &Handler, capture: Option<Capture<'_>>) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(registry) = &self.registry {
                let found = registry
                    .get(&handler.id())
                    .map(|h| h.id() == handler.id())
                    .unwrap_or(false);
                self.was_registered.store(found, Ordering::SeqCst);
            }

            if let Some(capture) = capture {
                self.saw_capture.store(true, Ordering::SeqCst);
                let mut stdout = capture.stdout;
                for line in &self.stdout_lines {
                    writeln!(stdout, "{line}")?;
                }
                let mut stderr = capture.stderr;
                for line in &self.stderr_lines {
                    writeln!(stderr, "{line}")?;
                }
            }

            if let Some(status) = self.status {
                handler.set_status(status);
            }
            if let Some(body) = &self.body {
                handler.write_body(body)?;
            }
            if let Some(msg) = &self.fail_with {
                bail!("{msg}");
            }
            Ok(())
        }
    }

    /// Runs `route.command` through `sh -c`, wiring capture pipes to the
    /// child's stdout/stderr.
    pub struct ShellSpawner;

    impl Spawner for ShellSpawner {
        fn spawn(&self, handler: &Handler, capture: Option<Capture<'_>>) -> anyhow::Result<()> {
            let mut cmd = Command::new("sh");
            cmd.arg("-c")
                .arg(&handler.route().command)
                .env("PROCGATE_HANDLER_ID", handler.id().to_string())
                .stdin(Stdio::null());
            match capture {
                Some(capture) => {
                    cmd.stdout(Stdio::from(capture.stdout.try_clone()?));
                    cmd.stderr(Stdio::from(capture.stderr.try_clone()?));
                }
                None => {
                    cmd.stdout(Stdio::null());
                    cmd.stderr(Stdio::null());
                }
            }
            let status = cmd.status().context("failed to run sh")?;
            // Command keeps its copies of the write ends until dropped.
            drop(cmd);
            if !status.success() {
                bail!("command exited with {status}");
            }
            Ok(())
        }
    }
}

pub mod client {
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpStream};
    use std::time::Duration;

    /// Send one raw HTTP/1.1 request and return (status, body).
    pub fn send_request(addr: SocketAddr, raw: &str) -> (u16, Vec<u8>) {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream.write_all(raw.as_bytes()).unwrap();

        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let header_end = loop {
            let n = stream.read(&mut chunk).unwrap();
            assert!(n > 0, "connection closed before headers");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let status: u16 = head
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap();
        let content_length: usize = head
            .lines()
            .find_map(|l| {
                let (name, value) = l.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse().ok())
                    .flatten()
            })
            .unwrap_or(0);

        while buf.len() < header_end + content_length {
            let n = stream.read(&mut chunk).unwrap();
            assert!(n > 0, "connection closed before body");
            buf.extend_from_slice(&chunk[..n]);
        }
        (status, buf[header_end..header_end + content_length].to_vec())
    }
}
