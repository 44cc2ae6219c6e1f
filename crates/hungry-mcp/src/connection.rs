//! One worker lifetime: the write half, the reader task and the pending map.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::codec::{decode_line, Frame, Message};
use crate::error::McpError;
use crate::launcher::{BoxedReader, BoxedWriter, WorkerIo, WorkerProcess};
use crate::pending::{PendingGuard, PendingRequests};

/// A live protocol session with one worker process.
///
/// Owns the background reader (and stderr monitor) for as long as the worker
/// lives; both are aborted when the connection is closed or dropped.
pub(crate) struct Connection {
    name: String,
    writer: AsyncMutex<Option<BoxedWriter>>,
    pending: Arc<PendingRequests>,
    process: Mutex<Option<Box<dyn WorkerProcess>>>,
    reader_task: JoinHandle<()>,
    stderr_task: Option<JoinHandle<()>>,
}

impl Connection {
    /// Take over a started worker and start reading its output.
    pub(crate) fn open(name: impl Into<String>, process: Box<dyn WorkerProcess>, io: WorkerIo) -> Self {
        let name = name.into();
        let pending = Arc::new(PendingRequests::default());

        let reader_task = tokio::spawn(read_loop(name.clone(), io.stdout, Arc::clone(&pending)));
        let stderr_task = io
            .stderr
            .map(|stderr| tokio::spawn(stderr_loop(name.clone(), stderr)));

        Self {
            name,
            writer: AsyncMutex::new(Some(io.stdin)),
            pending,
            process: Mutex::new(Some(process)),
            reader_task,
            stderr_task,
        }
    }

    /// Liveness probe: the output stream is open and the process is running.
    pub(crate) fn is_alive(&self) -> bool {
        if self.pending.is_closed() || self.reader_task.is_finished() {
            return false;
        }
        let mut process = self.process.lock().unwrap_or_else(PoisonError::into_inner);
        process.as_mut().is_some_and(|p| p.is_running())
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Write one message and flush it.
    pub(crate) async fn send(&self, message: &Message) -> Result<(), McpError> {
        let line = message.encode()?;
        trace!(worker = %self.name, line = %line.trim_end(), "Sending to worker stdin");

        let mut writer = self.writer.lock().await;
        let stdin = writer.as_mut().ok_or(McpError::ConnectionLost)?;
        write_line(stdin, &line).await
    }

    /// Like [`Connection::send`], but gives up at `deadline`.
    ///
    /// Returns `Ok(false)` when the deadline passed first. A write cut off
    /// midway leaves a partial line on the pipe, so the connection is closed.
    async fn send_before(&self, message: &Message, deadline: Instant) -> Result<bool, McpError> {
        let line = message.encode()?;
        trace!(worker = %self.name, line = %line.trim_end(), "Sending to worker stdin");

        let Ok(mut writer) = tokio::time::timeout_at(deadline, self.writer.lock()).await else {
            return Ok(false);
        };
        let stdin = writer.as_mut().ok_or(McpError::ConnectionLost)?;
        let written = tokio::time::timeout_at(deadline, write_line(stdin, &line)).await;
        match written {
            Ok(result) => result.map(|()| true),
            Err(_) => {
                writer.take();
                drop(writer);
                let failed = self.pending.fail_all();
                error!(worker = %self.name, failed, "Worker stopped reading stdin; closing connection");
                Ok(false)
            }
        }
    }

    /// Send a request and wait up to `timeout` for its response.
    ///
    /// The deadline covers the write as well as the wait. On timeout the
    /// worker is left alone; a late response is dropped by the reader because
    /// the pending entry is gone.
    pub(crate) async fn request(
        &self,
        id: u64,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        let deadline = Instant::now() + timeout;
        let rx = self.pending.register(id)?;
        let _guard = PendingGuard::new(&self.pending, id);

        let timed_out = || {
            warn!(
                worker = %self.name,
                id,
                method,
                timeout_ms = timeout.as_millis() as u64,
                "Request timed out"
            );
            McpError::Timeout {
                method: method.to_string(),
                after: timeout,
            }
        };

        if !self.send_before(&Message::request(id, method, params), deadline).await? {
            return Err(timed_out());
        }
        debug!(worker = %self.name, id, method, "Request sent");

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(completion)) => completion,
            Ok(Err(_)) => Err(McpError::ConnectionLost),
            Err(_) => Err(timed_out()),
        }
    }

    /// Stop the worker: close stdin, wait `grace`, kill if needed.
    ///
    /// Whatever is still pending afterwards fails with connection-lost.
    pub(crate) async fn close(&self, grace: Duration) -> Result<(), McpError> {
        self.writer.lock().await.take();

        let process = self
            .process
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let result = match process {
            Some(mut process) => process.stop(grace).await,
            None => Ok(()),
        };

        self.reader_task.abort();
        if let Some(task) = &self.stderr_task {
            task.abort();
        }

        let failed = self.pending.fail_all();
        if failed > 0 {
            warn!(worker = %self.name, failed, "Failed pending requests on shutdown");
        }
        result
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader_task.abort();
        if let Some(task) = &self.stderr_task {
            task.abort();
        }
    }
}

async fn write_line(stdin: &mut BoxedWriter, line: &str) -> Result<(), McpError> {
    stdin
        .write_all(line.as_bytes())
        .await
        .map_err(McpError::Write)?;
    stdin.flush().await.map_err(McpError::Write)
}

/// Route one decoded line to its waiter.
pub(crate) fn dispatch_frame(worker: &str, pending: &PendingRequests, frame: Frame) {
    match frame {
        Frame::Message(Message::Response { id, outcome }) => {
            if !pending.resolve(id, outcome.map_err(McpError::from)) {
                debug!(worker, id, "Dropping response for unknown or expired request");
            }
        }
        Frame::Message(Message::Notification { method, .. }) => {
            debug!(worker, method = %method, "Worker notification");
        }
        Frame::Message(Message::Request { id, method, .. }) => {
            warn!(worker, id, method = %method, "Ignoring request issued by worker");
        }
        Frame::Noise => {}
        Frame::Invalid(reason) => {
            debug!(worker, reason = %reason, "Skipping non-protocol line");
        }
    }
}

async fn read_loop(name: String, stdout: BoxedReader, pending: Arc<PendingRequests>) {
    debug!(worker = %name, "Reader started");
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    let mut line_count = 0u64;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                info!(worker = %name, lines = line_count, "Worker stdout closed (EOF)");
                break;
            }
            Ok(_) => {
                line_count += 1;
                let line = String::from_utf8_lossy(&buf);
                trace!(worker = %name, line = %line.trim_end(), "Worker stdout");
                dispatch_frame(&name, &pending, decode_line(&line));
            }
            Err(e) => {
                error!(worker = %name, error = %e, "Error reading worker stdout");
                break;
            }
        }
    }

    let failed = pending.fail_all();
    if failed > 0 {
        warn!(worker = %name, failed, "Connection lost with requests in flight");
    }
}

async fn stderr_loop(name: String, stderr: BoxedReader) {
    let mut reader = BufReader::new(stderr);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    warn!(worker = %name, stderr = %trimmed, "Worker stderr");
                }
            }
            Err(e) => {
                error!(worker = %name, error = %e, "Error reading worker stderr");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::pipe;
    use serde_json::json;

    fn response_line(id: u64, result: Value) -> String {
        Message::Response {
            id,
            outcome: Ok(result),
        }
        .encode()
        .unwrap()
    }

    #[tokio::test]
    async fn test_out_of_order_responses_reach_their_own_waiters() {
        let pending = PendingRequests::default();
        let mut rx5 = pending.register(5).unwrap();
        let mut rx6 = pending.register(6).unwrap();

        dispatch_frame("test", &pending, decode_line(&response_line(6, json!("six"))));
        assert!(rx5.try_recv().is_err());
        assert_eq!(rx6.try_recv().unwrap().unwrap(), json!("six"));

        dispatch_frame("test", &pending, decode_line(&response_line(5, json!("five"))));
        assert_eq!(rx5.try_recv().unwrap().unwrap(), json!("five"));
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn test_unknown_id_is_ignored() {
        let pending = PendingRequests::default();
        let mut rx = pending.register(1).unwrap();

        dispatch_frame("test", &pending, decode_line(&response_line(99, json!(null))));
        dispatch_frame("test", &pending, decode_line(r#"{"method":"notifications/message"}"#));

        assert!(rx.try_recv().is_err());
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_error_response_becomes_remote_error() {
        let pending = PendingRequests::default();
        let rx = pending.register(2).unwrap();
        dispatch_frame(
            "test",
            &pending,
            decode_line(r#"{"id":2,"error":{"code":-32601,"message":"Method not found"}}"#),
        );
        match rx.await.unwrap() {
            Err(McpError::Remote { code, message }) => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("Expected remote error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_noise_between_responses_does_not_disturb_delivery() {
        let (process, io, mut worker) = pipe();
        let conn = Arc::new(Connection::open("test", process, io));

        let first = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move {
                conn.request(1, "tools/call", json!({}), Duration::from_secs(5)).await
            })
        };
        let second = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move {
                conn.request(2, "tools/call", json!({}), Duration::from_secs(5)).await
            })
        };

        // Wait until both requests are on the wire.
        worker.next_message().await.unwrap();
        worker.next_message().await.unwrap();

        worker.send_line(&response_line(1, json!("one"))).await;
        worker.send_line("Loading taco database, please wait").await;
        worker.send_line("INFO Processing request of type CallToolRequest").await;
        worker.send_line(&response_line(2, json!("two"))).await;

        assert_eq!(first.await.unwrap().unwrap(), json!("one"));
        assert_eq!(second.await.unwrap().unwrap(), json!("two"));
        assert_eq!(conn.pending_len(), 0);
        assert!(conn.is_alive());
    }

    #[tokio::test]
    async fn test_write_to_stalled_worker_times_out_and_closes() {
        // The worker never reads, so a request larger than the pipe buffer blocks.
        let (process, io, _worker) = pipe();
        let conn = Connection::open("test", process, io);
        let blob = "x".repeat(200 * 1024);

        let result = tokio::time::timeout(
            Duration::from_secs(3),
            conn.request(1, "tools/call", json!({ "blob": blob }), Duration::from_millis(100)),
        )
        .await
        .expect("request must honor its own deadline");

        match result {
            Err(McpError::Timeout { method, after }) => {
                assert_eq!(method, "tools/call");
                assert_eq!(after, Duration::from_millis(100));
            }
            other => panic!("Expected timeout, got {:?}", other),
        }
        assert_eq!(conn.pending_len(), 0);
        assert!(!conn.is_alive());
        assert!(matches!(
            conn.request(2, "tools/call", json!({}), Duration::from_millis(100)).await,
            Err(McpError::ConnectionLost)
        ));
    }

    #[tokio::test]
    async fn test_waiting_for_the_write_lock_counts_against_the_deadline() {
        let (process, io, _worker) = pipe();
        let conn = Arc::new(Connection::open("test", process, io));

        let held = conn.writer.lock().await;
        let result = conn
            .request(1, "tools/call", json!({}), Duration::from_millis(50))
            .await;
        drop(held);

        assert!(matches!(result, Err(McpError::Timeout { .. })));
        assert_eq!(conn.pending_len(), 0);
        // Nothing was written, so the stream is intact.
        assert!(conn.is_alive());
    }

    #[tokio::test]
    async fn test_eof_fails_pending_and_marks_dead() {
        let (process, io, mut worker) = pipe();
        let conn = Arc::new(Connection::open("test", process, io));

        let call = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move {
                conn.request(1, "tools/call", json!({}), Duration::from_secs(5)).await
            })
        };
        worker.next_message().await.unwrap();
        drop(worker);

        assert!(matches!(call.await.unwrap(), Err(McpError::ConnectionLost)));
        assert_eq!(conn.pending_len(), 0);

        // The reader has finished by the time the waiter was failed.
        tokio::task::yield_now().await;
        assert!(!conn.is_alive());
    }

    #[tokio::test]
    async fn test_close_is_graceful_and_fails_stragglers() {
        let (process, io, mut worker) = pipe();
        let alive = Arc::clone(&worker.alive);
        let conn = Arc::new(Connection::open("test", process, io));

        let call = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move {
                conn.request(1, "tools/call", json!({}), Duration::from_secs(5)).await
            })
        };
        worker.next_message().await.unwrap();

        conn.close(Duration::from_millis(50)).await.unwrap();

        assert!(matches!(call.await.unwrap(), Err(McpError::ConnectionLost)));
        assert!(!alive.load(std::sync::atomic::Ordering::SeqCst));
        assert!(!conn.is_alive());
        // stdin was closed, so the worker sees EOF.
        assert!(worker.next_message().await.is_none());
        assert!(matches!(
            conn.send(&Message::notification("ping", Value::Null)).await,
            Err(McpError::ConnectionLost)
        ));
    }
}
