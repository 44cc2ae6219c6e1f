//! Hungry CLI - run intent-resolver function calls against local workers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hungry_core::SessionId;
use hungry_mcp::{
    BreakerConfig, ClientConfig, Credential, FunctionCall, GuardPolicy, McpClient, OrderingClient,
    TacoSearch, TimeoutConfig, ToolDispatcher, WorkerConfig, DEFAULT_AREA_LIMIT,
    DEFAULT_SEARCH_LIMIT, DEFAULT_TOP_RATED_LIMIT,
};

/// Hungry CLI - taco search and ordering from the command line
#[derive(Parser)]
#[command(name = "hungry")]
#[command(about = "Run hungry agent queries against local workers", long_about = None)]
struct Cli {
    #[command(flatten)]
    query: QueryWorkerArgs,

    #[command(flatten)]
    ordering: OrderingWorkerArgs,

    #[command(flatten)]
    tuning: TuningArgs,

    /// Session id echoed in responses (generated if omitted)
    #[arg(long, global = true)]
    session: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct QueryWorkerArgs {
    /// Taco search worker executable
    #[arg(long, default_value = "python3", global = true)]
    worker: String,

    /// Argument passed to the taco search worker (repeatable)
    #[arg(long = "worker-arg", default_value = "server.py", global = true)]
    worker_args: Vec<String>,

    /// Working directory of the taco search worker
    #[arg(long, global = true)]
    worker_dir: Option<PathBuf>,

    /// Extra KEY=VALUE environment for workers (repeatable)
    #[arg(long = "env", value_parser = parse_env_pair, global = true)]
    env: Vec<(String, String)>,

    /// Name of an environment variable to forward to the workers
    #[arg(long, global = true)]
    credential_env: Option<String>,
}

#[derive(Args)]
struct OrderingWorkerArgs {
    /// Ordering worker executable (ordering functions are disabled without it)
    #[arg(long, global = true)]
    ordering_worker: Option<String>,

    /// Argument passed to the ordering worker (repeatable)
    #[arg(long = "ordering-arg", global = true)]
    ordering_args: Vec<String>,

    /// Working directory of the ordering worker
    #[arg(long, global = true)]
    ordering_dir: Option<PathBuf>,
}

#[derive(Args)]
struct TuningArgs {
    /// Delay between spawning a worker and the handshake, in milliseconds
    #[arg(long, default_value = "1000", global = true)]
    startup_delay_ms: u64,

    /// Deadline for database lookups, in seconds
    #[arg(long, default_value = "5", global = true)]
    fast_timeout_secs: u64,

    /// Deadline for browser automation calls, in seconds
    #[arg(long, default_value = "30", global = true)]
    slow_timeout_secs: u64,

    /// Consecutive failures before searches are served from the offline list
    #[arg(long, default_value = "3", global = true)]
    failure_threshold: u32,

    /// Seconds before a tripped breaker lets a probe through
    #[arg(long, default_value = "60", global = true)]
    recovery_secs: u64,

    /// Guard every query operation, not only keyword search
    #[arg(long, global = true)]
    guard_all: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Keyword search
    Search {
        query: String,

        #[arg(short, long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: u32,
    },

    /// Restaurant details
    Details {
        /// Restaurant name
        name: String,
    },

    /// Top-rated restaurants
    #[command(name = "top-rated")]
    TopRated {
        #[arg(short, long, default_value_t = DEFAULT_TOP_RATED_LIMIT)]
        limit: u32,
    },

    /// Restaurants in an area
    Area {
        area: String,

        #[arg(short, long, default_value_t = DEFAULT_AREA_LIMIT)]
        limit: u32,
    },

    /// Check whether the taco search worker answers
    Health,

    /// Run any function call by name
    Call {
        /// Function name
        function: String,

        /// Parameters as a JSON object
        #[arg(default_value = "{}")]
        params: String,
    },
}

impl Commands {
    fn into_call(self) -> Result<FunctionCall, Box<dyn std::error::Error>> {
        let call = match self {
            Commands::Search { query, limit } => {
                FunctionCall::new("search_tacos", json!({ "query": query, "limit": limit }))
            }
            Commands::Details { name } => {
                FunctionCall::new("get_restaurant_details", json!({ "restaurant_name": name }))
            }
            Commands::TopRated { limit } => {
                FunctionCall::new("get_top_rated_tacos", json!({ "limit": limit }))
            }
            Commands::Area { area, limit } => {
                FunctionCall::new("search_by_area", json!({ "area": area, "limit": limit }))
            }
            Commands::Health => FunctionCall::new("health_check", json!({})),
            Commands::Call { function, params } => {
                let params: Value = serde_json::from_str(&params)?;
                FunctionCall::new(function, params)
            }
        };
        Ok(call)
    }
}

fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries only the JSON response
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("hungry=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let session = cli
        .session
        .map(SessionId::new)
        .unwrap_or_else(SessionId::generate);
    let client_config = client_config(&cli.tuning);
    let credential = forwarded_credential(cli.query.credential_env.as_deref());

    let query_worker = worker_config(
        &cli.query.worker,
        &cli.query.worker_args,
        cli.query.worker_dir.clone(),
        &cli.query.env,
        credential.clone(),
    );
    let query_client = Arc::new(McpClient::for_process(query_worker, client_config.clone()));

    let policy = if cli.tuning.guard_all {
        GuardPolicy::all()
    } else {
        GuardPolicy::default()
    };
    let search = TacoSearch::new(Arc::clone(&query_client))
        .with_breaker(
            BreakerConfig::default()
                .with_failure_threshold(cli.tuning.failure_threshold)
                .with_recovery_timeout(Duration::from_secs(cli.tuning.recovery_secs)),
        )
        .with_policy(policy);
    let mut dispatcher = ToolDispatcher::new(Arc::new(search));

    let ordering_client = cli.ordering.ordering_worker.as_deref().map(|program| {
        let worker = worker_config(
            program,
            &cli.ordering.ordering_args,
            cli.ordering.ordering_dir.clone(),
            &cli.query.env,
            credential.clone(),
        );
        Arc::new(McpClient::for_process(worker, client_config.clone()))
    });
    if let Some(client) = &ordering_client {
        dispatcher = dispatcher.with_ordering(Arc::new(OrderingClient::new(Arc::clone(client))));
    }

    let call = cli.command.into_call()?;
    info!(function = %call.name, session = %session, "Executing function call");
    let response = dispatcher.execute_call(&call, &session).await;

    println!("{}", serde_json::to_string_pretty(&response)?);

    let mut clients = vec![query_client.as_ref()];
    clients.extend(ordering_client.as_deref());
    McpClient::terminate_all(&clients).await?;

    if !response.success {
        std::process::exit(1);
    }
    Ok(())
}

fn client_config(tuning: &TuningArgs) -> ClientConfig {
    ClientConfig::default()
        .with_startup_delay(Duration::from_millis(tuning.startup_delay_ms))
        .with_timeouts(TimeoutConfig {
            fast: Duration::from_secs(tuning.fast_timeout_secs),
            slow: Duration::from_secs(tuning.slow_timeout_secs),
        })
}

fn worker_config(
    program: &str,
    args: &[String],
    dir: Option<PathBuf>,
    env: &[(String, String)],
    credential: Option<Credential>,
) -> WorkerConfig {
    let mut config = WorkerConfig::new(program);
    for arg in args {
        config = config.with_arg(arg.as_str());
    }
    if let Some(dir) = dir {
        config = config.with_working_dir(dir);
    }
    for (key, value) in env {
        config = config.with_env(key.as_str(), value.as_str());
    }
    if let Some(credential) = credential {
        config = config.with_credential(credential);
    }
    config
}

fn forwarded_credential(name: Option<&str>) -> Option<Credential> {
    let name = name?;
    match std::env::var(name) {
        Ok(value) => Some(Credential::new(name, value)),
        Err(_) => {
            warn!(env_var = name, "Credential variable is not set, not forwarding");
            None
        }
    }
}
