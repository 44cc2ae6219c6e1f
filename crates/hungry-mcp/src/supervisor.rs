//! Worker lifecycle: lazy start, crash detection, restart and shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::codec::Message;
use crate::config::{ClientConfig, PROTOCOL_VERSION};
use crate::connection::Connection;
use crate::error::McpError;
use crate::launcher::WorkerLauncher;
use crate::pending::RequestIds;

/// Observable state of the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Never started, or terminated.
    Absent,
    /// A start is in progress.
    Starting,
    /// Running with an open output stream.
    Ready,
    /// Started earlier but has since died.
    Exited,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Starting => write!(f, "starting"),
            Self::Ready => write!(f, "ready"),
            Self::Exited => write!(f, "exited"),
        }
    }
}

/// Owns the single worker of a client.
///
/// Startup is serialized: concurrent callers that find no live worker wait on
/// one start instead of launching their own.
pub struct Supervisor {
    launcher: Arc<dyn WorkerLauncher>,
    config: ClientConfig,
    ids: Arc<RequestIds>,
    current: Mutex<Option<Arc<Connection>>>,
    init_lock: AsyncMutex<()>,
    starting: AtomicBool,
}

struct StartingFlag<'a>(&'a AtomicBool);

impl<'a> StartingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for StartingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Supervisor {
    pub fn new(launcher: Arc<dyn WorkerLauncher>, config: ClientConfig, ids: Arc<RequestIds>) -> Self {
        Self {
            launcher,
            config,
            ids,
            current: Mutex::new(None),
            init_lock: AsyncMutex::new(()),
            starting: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn current(&self) -> MutexGuard<'_, Option<Arc<Connection>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live(&self) -> Option<Arc<Connection>> {
        self.current()
            .as_ref()
            .filter(|conn| conn.is_alive())
            .map(Arc::clone)
    }

    /// Current worker state without side effects.
    pub fn probe(&self) -> WorkerState {
        if self.starting.load(Ordering::Acquire) {
            return WorkerState::Starting;
        }
        match self.current().as_ref() {
            None => WorkerState::Absent,
            Some(conn) if conn.is_alive() => WorkerState::Ready,
            Some(_) => WorkerState::Exited,
        }
    }

    /// Requests waiting on the current worker.
    pub fn pending_requests(&self) -> usize {
        self.current().as_ref().map_or(0, |conn| conn.pending_len())
    }

    /// Make sure a live worker exists, starting or restarting one if needed.
    pub async fn ensure_running(&self) -> Result<(), McpError> {
        self.connection().await.map(|_| ())
    }

    pub(crate) async fn connection(&self) -> Result<Arc<Connection>, McpError> {
        if let Some(conn) = self.live() {
            return Ok(conn);
        }

        let _init = self.init_lock.lock().await;
        // Someone else may have finished a start while we waited.
        if let Some(conn) = self.live() {
            return Ok(conn);
        }

        let stale = self.current().take();
        if let Some(stale) = stale {
            info!(worker = %self.launcher.name(), "Worker exited, restarting");
            if let Err(e) = stale.close(self.config.shutdown_grace).await {
                warn!(worker = %self.launcher.name(), error = %e, "Failed to clean up exited worker");
            }
        }

        let _flag = StartingFlag::raise(&self.starting);
        let conn = Arc::new(self.start().await?);
        *self.current() = Some(Arc::clone(&conn));
        info!(worker = %self.launcher.name(), "Worker ready");
        Ok(conn)
    }

    async fn start(&self) -> Result<Connection, McpError> {
        let name = self.launcher.name();
        let (process, io) = self.launcher.launch().await?;
        let pid = process.pid();
        let conn = Connection::open(name, process, io);
        debug!(worker = %name, ?pid, "Worker launched");

        if !self.config.startup_delay.is_zero() {
            tokio::time::sleep(self.config.startup_delay).await;
        }

        // Workers that skip the handshake are still usable.
        if let Err(e) = self.handshake(&conn).await {
            warn!(worker = %name, error = %e, "Handshake failed, continuing without it");
        }
        Ok(conn)
    }

    async fn handshake(&self, conn: &Connection) -> Result<(), McpError> {
        let info = &self.config.client_info;
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "clientInfo": { "name": info.name, "version": info.version },
        });

        let id = self.ids.next();
        let response = conn
            .request(id, "initialize", params, self.config.timeouts.fast)
            .await?;
        let server = response.get("serverInfo").cloned().unwrap_or_default();
        debug!(
            worker = %self.launcher.name(),
            server = %server,
            "Worker initialized"
        );

        conn.send(&Message::notification("notifications/initialized", json!({})))
            .await
    }

    /// Stop the worker if one exists. Safe to call repeatedly.
    pub async fn terminate(&self) -> Result<(), McpError> {
        let _init = self.init_lock.lock().await;
        let conn = self.current().take();
        match conn {
            Some(conn) => {
                info!(worker = %self.launcher.name(), "Stopping worker");
                let result = conn.close(self.config.shutdown_grace).await;
                info!(worker = %self.launcher.name(), "Worker stopped");
                result
            }
            None => {
                debug!(worker = %self.launcher.name(), "No worker to stop");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{quick_config, FakeLauncher, Reply};
    use serde_json::Value;

    fn supervisor(launcher: Arc<FakeLauncher>) -> Supervisor {
        Supervisor::new(launcher, quick_config(), Arc::new(RequestIds::new()))
    }

    #[tokio::test]
    async fn test_starts_lazily() {
        let launcher = FakeLauncher::auto(|_, _| Reply::Result(Value::Null));
        let sup = supervisor(Arc::clone(&launcher));

        assert_eq!(sup.probe(), WorkerState::Absent);
        assert_eq!(launcher.launches(), 0);

        sup.ensure_running().await.unwrap();
        assert_eq!(sup.probe(), WorkerState::Ready);
        assert_eq!(launcher.launches(), 1);

        sup.ensure_running().await.unwrap();
        assert_eq!(launcher.launches(), 1);
    }

    #[tokio::test]
    async fn test_handshake_is_sent_first() {
        let (launcher, mut workers) = FakeLauncher::manual();
        let sup = Arc::new(supervisor(launcher));

        let start = {
            let sup = Arc::clone(&sup);
            tokio::spawn(async move { sup.ensure_running().await })
        };
        let mut worker = workers.recv().await.unwrap();

        match worker.next_message().await.unwrap() {
            Message::Request { id, method, params } => {
                assert_eq!(method, "initialize");
                assert_eq!(params["protocolVersion"], PROTOCOL_VERSION);
                assert_eq!(params["clientInfo"]["name"], "hungry-agent");
                worker.respond(id, crate::testing::initialize_result()).await;
            }
            other => panic!("Expected initialize, got {:?}", other),
        }
        match worker.next_message().await.unwrap() {
            Message::Notification { method, .. } => assert_eq!(method, "notifications/initialized"),
            other => panic!("Expected notification, got {:?}", other),
        }

        start.await.unwrap().unwrap();
        assert_eq!(sup.probe(), WorkerState::Ready);
    }

    #[tokio::test]
    async fn test_concurrent_starts_coalesce() {
        let launcher = FakeLauncher::auto(|_, _| Reply::Result(Value::Null));
        let sup = Arc::new(supervisor(Arc::clone(&launcher)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sup = Arc::clone(&sup);
                tokio::spawn(async move { sup.ensure_running().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(launcher.launches(), 1);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_retryable() {
        let launcher = FakeLauncher::auto(|_, _| Reply::Result(Value::Null));
        launcher.fail_next(1);
        let sup = supervisor(Arc::clone(&launcher));

        let err = sup.ensure_running().await.unwrap_err();
        assert!(matches!(err, McpError::Spawn { .. }));
        assert_eq!(sup.probe(), WorkerState::Absent);

        sup.ensure_running().await.unwrap();
        assert_eq!(sup.probe(), WorkerState::Ready);
        assert_eq!(launcher.launches(), 2);
    }

    #[tokio::test]
    async fn test_crash_is_detected_and_restarted() {
        let (launcher, mut workers) = FakeLauncher::manual();
        let sup = Arc::new(supervisor(Arc::clone(&launcher)));

        let start = {
            let sup = Arc::clone(&sup);
            tokio::spawn(async move { sup.ensure_running().await })
        };
        let mut worker = workers.recv().await.unwrap();
        worker.complete_handshake().await;
        start.await.unwrap().unwrap();

        worker.alive.store(false, Ordering::SeqCst);
        drop(worker);
        tokio::task::yield_now().await;
        assert_eq!(sup.probe(), WorkerState::Exited);

        let restart = {
            let sup = Arc::clone(&sup);
            tokio::spawn(async move { sup.ensure_running().await })
        };
        let mut replacement = workers.recv().await.unwrap();
        replacement.complete_handshake().await;
        restart.await.unwrap().unwrap();

        assert_eq!(sup.probe(), WorkerState::Ready);
        assert_eq!(launcher.launches(), 2);
    }

    #[tokio::test]
    async fn test_silent_worker_still_becomes_ready() {
        let (launcher, mut workers) = FakeLauncher::manual();
        let sup = Arc::new(supervisor(launcher));

        let start = {
            let sup = Arc::clone(&sup);
            tokio::spawn(async move { sup.ensure_running().await })
        };
        // Keep the worker alive but never answer initialize.
        let _worker = workers.recv().await.unwrap();

        start.await.unwrap().unwrap();
        assert_eq!(sup.probe(), WorkerState::Ready);
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let launcher = FakeLauncher::auto(|_, _| Reply::Result(Value::Null));
        let sup = supervisor(launcher);

        sup.terminate().await.unwrap();
        sup.ensure_running().await.unwrap();
        sup.terminate().await.unwrap();
        assert_eq!(sup.probe(), WorkerState::Absent);
        sup.terminate().await.unwrap();
        assert_eq!(sup.probe(), WorkerState::Absent);
    }
}
