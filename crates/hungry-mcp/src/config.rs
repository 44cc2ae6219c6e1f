//! Worker client configuration.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// MCP protocol revision announced during the handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// How to start a worker process.
///
/// Everything here is passed through to the child untouched; the client never
/// inspects the working directory, interpreter or credential.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Program (usually an interpreter) to execute.
    pub program: String,

    /// Arguments passed to the program.
    pub args: Vec<String>,

    /// Working directory of the worker; inherits ours when unset.
    pub working_dir: Option<PathBuf>,

    /// Additional environment variables.
    pub env: Vec<(String, String)>,

    /// Secret forwarded through the environment.
    pub credential: Option<Credential>,
}

impl WorkerConfig {
    /// Create a config for the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            credential: None,
        }
    }

    /// Add a program argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Forward a credential to the worker.
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }
}

/// An opaque secret handed to the worker as an environment variable.
#[derive(Clone)]
pub struct Credential {
    env_var: String,
    value: String,
}

impl Credential {
    pub fn new(env_var: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            env_var: env_var.into(),
            value: value.into(),
        }
    }

    pub fn env_var(&self) -> &str {
        &self.env_var
    }

    pub(crate) fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("env_var", &self.env_var)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// Timeout class of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallClass {
    /// Database lookups.
    Fast,
    /// Long-running work such as browser automation.
    Slow,
}

/// Per-class request deadlines.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutConfig {
    pub fast: Duration,
    pub slow: Duration,
}

impl TimeoutConfig {
    /// Deadline for the given class.
    pub fn for_class(&self, class: CallClass) -> Duration {
        match class {
            CallClass::Fast => self.fast,
            CallClass::Slow => self.slow,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            fast: Duration::from_secs(5),
            slow: Duration::from_secs(30),
        }
    }
}

/// Identity announced to the worker in the `initialize` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "hungry-agent".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Client-side settings shared by every worker lifetime.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Pause between spawning the worker and starting the handshake.
    pub startup_delay: Duration,

    /// How long a worker gets to exit after its stdin is closed before it is killed.
    pub shutdown_grace: Duration,

    pub timeouts: TimeoutConfig,

    pub client_info: ClientInfo,
}

impl ClientConfig {
    /// Set the startup delay.
    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    /// Set the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set the per-class timeouts.
    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the identity announced during the handshake.
    pub fn with_client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_info = ClientInfo {
            name: name.into(),
            version: version.into(),
        };
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            startup_delay: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(5),
            timeouts: TimeoutConfig::default(),
            client_info: ClientInfo::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_builder() {
        let config = WorkerConfig::new("python3")
            .with_arg("server.py")
            .with_working_dir("workers/taco-search")
            .with_env("PYTHONUNBUFFERED", "1")
            .with_credential(Credential::new("UBER_EATS_PASSWORD", "hunter2"));

        assert_eq!(config.program, "python3");
        assert_eq!(config.args, vec!["server.py".to_string()]);
        assert_eq!(config.working_dir, Some(PathBuf::from("workers/taco-search")));
        assert_eq!(config.env.len(), 1);
        assert_eq!(
            config.credential.as_ref().map(|c| c.env_var()),
            Some("UBER_EATS_PASSWORD")
        );
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = Credential::new("API_KEY", "super-secret");
        let debug = format!("{:?}", credential);
        assert!(debug.contains("API_KEY"));
        assert!(!debug.contains("super-secret"));
    }

    #[test]
    fn test_default_timeouts() {
        let timeouts = TimeoutConfig::default();
        assert_eq!(timeouts.for_class(CallClass::Fast), Duration::from_secs(5));
        assert_eq!(timeouts.for_class(CallClass::Slow), Duration::from_secs(30));
    }

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfig::default()
            .with_startup_delay(Duration::ZERO)
            .with_client_info("hungry-agent-taco-search", "1.0.0");
        assert_eq!(config.startup_delay, Duration::ZERO);
        assert_eq!(config.client_info.name, "hungry-agent-taco-search");
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
    }
}
