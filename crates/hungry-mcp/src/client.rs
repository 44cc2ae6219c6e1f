//! Request/response client for a supervised stdio worker.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::codec::Message;
use crate::config::{CallClass, ClientConfig, WorkerConfig};
use crate::error::McpError;
use crate::launcher::{ProcessLauncher, WorkerLauncher};
use crate::pending::RequestIds;
use crate::supervisor::{Supervisor, WorkerState};

/// Multiplexes concurrent requests over one long-lived worker.
///
/// The worker is started on first use and restarted transparently after it
/// dies. Each call carries a fresh id and waits only for its own response.
///
/// # Example
///
/// ```no_run
/// use hungry_mcp::{CallClass, ClientConfig, McpClient, WorkerConfig};
/// use serde_json::json;
///
/// # async fn example() -> Result<(), hungry_mcp::McpError> {
/// let worker = WorkerConfig::new("uv").with_arg("run").with_arg("taco-server");
/// let client = McpClient::for_process(worker, ClientConfig::default());
///
/// let result = client
///     .call_tool("search_tacos", json!({ "query": "brisket" }), CallClass::Fast)
///     .await?;
/// println!("{}", result);
///
/// client.terminate().await?;
/// # Ok(())
/// # }
/// ```
pub struct McpClient {
    supervisor: Supervisor,
    ids: Arc<RequestIds>,
}

impl McpClient {
    pub fn new(launcher: Arc<dyn WorkerLauncher>, config: ClientConfig) -> Self {
        let ids = Arc::new(RequestIds::new());
        Self {
            supervisor: Supervisor::new(launcher, config, Arc::clone(&ids)),
            ids,
        }
    }

    /// Client for a worker spawned as a child process.
    pub fn for_process(worker: WorkerConfig, config: ClientConfig) -> Self {
        Self::new(Arc::new(ProcessLauncher::new(worker)), config)
    }

    pub fn state(&self) -> WorkerState {
        self.supervisor.probe()
    }

    /// Requests currently waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.supervisor.pending_requests()
    }

    pub async fn ensure_running(&self) -> Result<(), McpError> {
        self.supervisor.ensure_running().await
    }

    /// Call `method` with the deadline of `class`.
    pub async fn call(&self, method: &str, params: Value, class: CallClass) -> Result<Value, McpError> {
        let timeout = self.supervisor.config().timeouts.for_class(class);
        self.call_with_timeout(method, params, timeout).await
    }

    /// Call `method` with an explicit deadline.
    ///
    /// A timeout only abandons this request; the worker keeps running.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        let conn = self.supervisor.connection().await?;
        let id = self.ids.next();
        debug!(id, method, "Calling worker");
        conn.request(id, method, params, timeout).await
    }

    /// Send a notification; no response is expected.
    pub async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        let conn = self.supervisor.connection().await?;
        conn.send(&Message::notification(method, params)).await
    }

    /// Invoke a worker tool through `tools/call`.
    pub async fn call_tool(&self, name: &str, arguments: Value, class: CallClass) -> Result<Value, McpError> {
        let params = json!({ "name": name, "arguments": arguments });
        self.call("tools/call", params, class).await
    }

    /// Stop the worker. Safe to call repeatedly.
    pub async fn terminate(&self) -> Result<(), McpError> {
        self.supervisor.terminate().await
    }

    /// Stop every client's worker, even when one of them fails to stop.
    ///
    /// Returns the first error.
    pub async fn terminate_all(clients: &[&McpClient]) -> Result<(), McpError> {
        let mut first_error = None;
        for client in clients {
            if let Err(e) = client.terminate().await {
                warn!(error = %e, "Failed to stop worker");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
