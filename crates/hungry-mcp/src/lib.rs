//! Worker client for the hungry agent
//!
//! This crate talks to long-lived worker subprocesses (the fast taco database
//! and the browser-automation ordering worker) over newline-delimited
//! JSON-RPC on stdio, and turns their answers into [`DomainResponse`]s.
//!
//! Layers, bottom-up:
//! - [`codec`]: line framing and noise filtering
//! - [`WorkerLauncher`] / [`Supervisor`]: spawn, handshake, liveness, restart
//! - [`McpClient`]: id-multiplexed requests with per-class timeouts
//! - [`CircuitBreaker`], [`guarded_call`] and [`StaticFallback`]
//! - [`TacoSearch`], [`OrderingClient`], [`BatchOrders`] and [`ToolDispatcher`]: the façades
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hungry_core::SessionId;
//! use hungry_mcp::{ClientConfig, McpClient, TacoSearch, WorkerConfig};
//!
//! async fn find_brisket() -> Result<(), Box<dyn std::error::Error>> {
//!     let worker = WorkerConfig::new("python3")
//!         .with_arg("server.py")
//!         .with_working_dir("submodules/taco-search-mcp-server");
//!     let client = Arc::new(McpClient::for_process(worker, ClientConfig::default()));
//!     let search = TacoSearch::new(Arc::clone(&client));
//!
//!     let response = search.search_tacos("brisket", 5, &SessionId::generate()).await;
//!     println!("{}", response.message().unwrap_or_default());
//!
//!     client.terminate().await?;
//!     Ok(())
//! }
//! ```

pub mod codec;

mod batch;
mod breaker;
mod client;
mod config;
mod connection;
mod dispatch;
mod error;
mod fallback;
mod guard;
mod launcher;
mod ordering;
mod pending;
mod supervisor;
mod taco;
mod tool;

#[cfg(test)]
mod testing;

// Re-export main types
pub use batch::{BatchOrder, BatchOrders, BatchStatus, DEFAULT_BATCH_LOCATION, DEFAULT_RESULTS_DELAY, MAX_CONCURRENT_ORDERS};
pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use client::McpClient;
pub use config::{CallClass, ClientConfig, ClientInfo, Credential, TimeoutConfig, WorkerConfig, PROTOCOL_VERSION};
pub use dispatch::{FunctionCall, ToolDispatcher, DEFAULT_AREA_LIMIT, DEFAULT_SEARCH_LIMIT, DEFAULT_TOP_RATED_LIMIT};
pub use error::McpError;
pub use fallback::StaticFallback;
pub use guard::guarded_call;
pub use launcher::{BoxedReader, BoxedWriter, ChildProcess, ProcessLauncher, WorkerIo, WorkerLauncher, WorkerProcess};
pub use ordering::{ActiveSearch, OrderingClient, DEFAULT_DELIVERY_ADDRESS, SEARCH_RESULTS_PREFIX};
pub use pending::RequestIds;
pub use supervisor::{Supervisor, WorkerState};
pub use taco::{GuardPolicy, QueryOperation, TacoSearch};
pub use tool::{resource_text, tool_text};

pub use hungry_core::{DomainResponse, SessionId};
