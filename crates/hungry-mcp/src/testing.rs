//! In-memory workers for tests.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::sync::mpsc;

use crate::codec::{decode_line, Frame, Message, RpcError};
use crate::config::{ClientConfig, TimeoutConfig, PROTOCOL_VERSION};
use crate::error::McpError;
use crate::launcher::{WorkerIo, WorkerLauncher, WorkerProcess};

pub(crate) struct FakeProcess {
    alive: Arc<AtomicBool>,
    fail_stop: bool,
}

#[async_trait]
impl WorkerProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        None
    }

    fn is_running(&mut self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn stop(&mut self, _grace: Duration) -> Result<(), McpError> {
        self.alive.store(false, Ordering::SeqCst);
        if self.fail_stop {
            return Err(McpError::Shutdown(io::Error::other("worker refused to die")));
        }
        Ok(())
    }
}

/// The worker's end of an in-memory connection.
pub(crate) struct WorkerSide {
    lines: Lines<BufReader<DuplexStream>>,
    stdout: DuplexStream,
    pub alive: Arc<AtomicBool>,
}

impl WorkerSide {
    /// Next protocol message written by the client, `None` once stdin closes.
    pub async fn next_message(&mut self) -> Option<Message> {
        loop {
            let line = self.lines.next_line().await.ok()??;
            if let Frame::Message(message) = decode_line(&line) {
                return Some(message);
            }
        }
    }

    pub async fn send_line(&mut self, line: &str) {
        self.stdout.write_all(line.trim_end().as_bytes()).await.unwrap();
        self.stdout.write_all(b"\n").await.unwrap();
        self.stdout.flush().await.unwrap();
    }

    pub async fn respond(&mut self, id: u64, result: Value) {
        let line = Message::Response {
            id,
            outcome: Ok(result),
        }
        .encode()
        .unwrap();
        self.send_line(&line).await;
    }

    pub async fn respond_error(&mut self, id: u64, code: i64, message: &str) {
        let line = Message::Response {
            id,
            outcome: Err(RpcError::new(code, message)),
        }
        .encode()
        .unwrap();
        self.send_line(&line).await;
    }

    /// Answer `initialize` and consume the `initialized` notification.
    pub async fn complete_handshake(&mut self) {
        match self.next_message().await {
            Some(Message::Request { id, method, .. }) if method == "initialize" => {
                self.respond(id, initialize_result()).await;
            }
            other => panic!("Expected initialize, got {:?}", other),
        }
        match self.next_message().await {
            Some(Message::Notification { method, .. }) => {
                assert_eq!(method, "notifications/initialized");
            }
            other => panic!("Expected initialized notification, got {:?}", other),
        }
    }
}

pub(crate) fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": {} },
        "serverInfo": { "name": "fake-taco-worker", "version": "0.0.1" }
    })
}

/// Tool result in the shape real workers produce.
pub(crate) fn tool_text(text: &str) -> Value {
    json!({ "content": [{ "type": "text", "text": text }] })
}

/// Client config with no startup delay and short deadlines.
pub(crate) fn quick_config() -> ClientConfig {
    ClientConfig::default()
        .with_startup_delay(Duration::ZERO)
        .with_shutdown_grace(Duration::from_millis(100))
        .with_timeouts(TimeoutConfig {
            fast: Duration::from_millis(500),
            slow: Duration::from_secs(2),
        })
}

/// A connected worker handle pair.
pub(crate) fn pipe() -> (Box<dyn WorkerProcess>, WorkerIo, WorkerSide) {
    pipe_with(false)
}

fn pipe_with(fail_stop: bool) -> (Box<dyn WorkerProcess>, WorkerIo, WorkerSide) {
    let (client_stdin, worker_stdin) = tokio::io::duplex(64 * 1024);
    let (worker_stdout, client_stdout) = tokio::io::duplex(64 * 1024);
    let alive = Arc::new(AtomicBool::new(true));

    let process = Box::new(FakeProcess {
        alive: Arc::clone(&alive),
        fail_stop,
    });
    let io = WorkerIo {
        stdin: Box::new(client_stdin),
        stdout: Box::new(client_stdout),
        stderr: None,
    };
    let side = WorkerSide {
        lines: BufReader::new(worker_stdin).lines(),
        stdout: worker_stdout,
        alive,
    };
    (process, io, side)
}

/// How an auto-serving fake worker answers a request.
pub(crate) enum Reply {
    Result(Value),
    Error(i64, String),
    /// Never answer.
    Silent,
}

type Handler = Arc<dyn Fn(&str, &Value) -> Reply + Send + Sync>;

enum Mode {
    /// Hand every new worker to the test.
    Manual(mpsc::UnboundedSender<WorkerSide>),
    /// Serve every new worker with a handler; `initialize` is answered automatically.
    Auto(Handler),
}

pub(crate) struct FakeLauncher {
    mode: Mode,
    launches: AtomicUsize,
    failures_left: AtomicUsize,
    failing_stops: AtomicBool,
}

impl FakeLauncher {
    pub fn manual() -> (Arc<Self>, mpsc::UnboundedReceiver<WorkerSide>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self::with_mode(Mode::Manual(tx))), rx)
    }

    pub fn auto<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&str, &Value) -> Reply + Send + Sync + 'static,
    {
        Arc::new(Self::with_mode(Mode::Auto(Arc::new(handler))))
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            launches: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            failing_stops: AtomicBool::new(false),
        }
    }

    /// Make the next `count` launches fail like a missing executable.
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Make workers launched from now on fail to stop cleanly.
    pub fn fail_stops(&self) {
        self.failing_stops.store(true, Ordering::SeqCst);
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerLauncher for FakeLauncher {
    fn name(&self) -> &str {
        "fake-taco-worker"
    }

    async fn launch(&self) -> Result<(Box<dyn WorkerProcess>, WorkerIo), McpError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(McpError::Spawn {
                program: self.name().to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such worker"),
            });
        }

        let (process, io, side) = pipe_with(self.failing_stops.load(Ordering::SeqCst));
        match &self.mode {
            Mode::Manual(tx) => {
                let _ = tx.send(side);
            }
            Mode::Auto(handler) => {
                tokio::spawn(serve(side, Arc::clone(handler)));
            }
        }
        Ok((process, io))
    }
}

async fn serve(mut side: WorkerSide, handler: Handler) {
    while let Some(message) = side.next_message().await {
        let Message::Request { id, method, params } = message else {
            continue;
        };
        if method == "initialize" {
            side.respond(id, initialize_result()).await;
            continue;
        }
        match handler(&method, &params) {
            Reply::Result(value) => side.respond(id, value).await,
            Reply::Error(code, message) => side.respond_error(id, code, &message).await,
            Reply::Silent => {}
        }
    }
}
