//! Starting worker processes.
//!
//! [`WorkerLauncher`] is the seam between the supervisor and the operating
//! system: the production [`ProcessLauncher`] spawns a child process, tests
//! plug in in-memory workers.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::error::McpError;

pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// The stdio streams of a started worker.
pub struct WorkerIo {
    pub stdin: BoxedWriter,
    pub stdout: BoxedReader,
    pub stderr: Option<BoxedReader>,
}

/// Handle to a running worker.
#[async_trait]
pub trait WorkerProcess: Send {
    /// OS process id, if there is one.
    fn pid(&self) -> Option<u32>;

    /// Non-blocking check whether the worker is still running.
    fn is_running(&mut self) -> bool;

    /// Stop the worker, killing it if it does not exit within the grace period.
    ///
    /// Callers close the worker's stdin first; that is the graceful stop
    /// signal for stdio workers. Workers that ignore it get a termination
    /// request and another `grace` before being killed.
    async fn stop(&mut self, grace: Duration) -> Result<(), McpError>;
}

/// Starts workers on behalf of the supervisor.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Start a new worker.
    async fn launch(&self) -> Result<(Box<dyn WorkerProcess>, WorkerIo), McpError>;
}

/// Launches workers as child processes.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    config: WorkerConfig,
}

impl ProcessLauncher {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }

        if let Some(credential) = &self.config.credential {
            cmd.env(credential.env_var(), credential.value());
        }

        cmd
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    fn name(&self) -> &str {
        &self.config.program
    }

    async fn launch(&self) -> Result<(Box<dyn WorkerProcess>, WorkerIo), McpError> {
        info!(
            program = %self.config.program,
            args = ?self.config.args,
            working_dir = ?self.config.working_dir,
            "Spawning worker process"
        );

        let mut child = self.command().spawn().map_err(|source| McpError::Spawn {
            program: self.config.program.clone(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or(McpError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(McpError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take();

        info!(pid = ?child.id(), "Worker process spawned");

        let io = WorkerIo {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: stderr.map(|s| Box::new(s) as BoxedReader),
        };

        Ok((Box::new(ChildProcess { child }), io))
    }
}

/// A worker running as an OS child process.
pub struct ChildProcess {
    child: Child,
}

#[async_trait]
impl WorkerProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn stop(&mut self, grace: Duration) -> Result<(), McpError> {
        if self.wait_for_exit(grace).await? {
            return Ok(());
        }

        self.request_termination().await;
        if self.wait_for_exit(grace).await? {
            return Ok(());
        }

        warn!(grace_ms = grace.as_millis() as u64, "Worker did not exit in time, killing");
        self.child.kill().await.map_err(McpError::Shutdown)?;
        debug!("Worker process killed");
        Ok(())
    }
}

impl ChildProcess {
    async fn wait_for_exit(&mut self, grace: Duration) -> Result<bool, McpError> {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(exit_code = ?status.code(), "Worker process exited");
                Ok(true)
            }
            Ok(Err(e)) => Err(McpError::Shutdown(e)),
            Err(_) => Ok(false),
        }
    }

    /// Send SIGTERM so the worker can shut down its own children.
    #[cfg(unix)]
    async fn request_termination(&mut self) {
        let Some(pid) = self.child.id() else {
            return;
        };
        debug!(pid, "Worker ignored stdin close, sending SIGTERM");
        let status = Command::new("kill")
            .arg("-TERM")
            .arg(pid.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            Ok(status) if status.success() => {}
            Ok(status) => debug!(pid, exit_code = ?status.code(), "kill -TERM did not succeed"),
            Err(e) => warn!(pid, error = %e, "Could not signal worker"),
        }
    }

    #[cfg(not(unix))]
    async fn request_termination(&mut self) {}
}
