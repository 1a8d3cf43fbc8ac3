//! docpool - Entry Point
//!
//! Builds the pool from environment configuration, registers the built-in
//! smoke-test functions, and serves the operator API until ctrl-c/SIGTERM.
//! The embedding application registers its real scraping/embedding/RAG
//! functions through [`docpool::FunctionRegistry`] before calling start.

use std::sync::Arc;
use std::time::Duration;

use docpool::{
    ApiServer, ApiState, Config, FunctionRegistry, TaskFailure, WorkerPool,
};
use serde_json::json;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("docpool v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: docpool [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --help, -h         Show this help");
        println!();
        println!("Environment variables:");
        println!("  DOCPOOL_HTTP_ADDR             Bind address (default: 127.0.0.1:8088)");
        println!("  DOCPOOL_WORKERS_SCRAPING      Scraping workers (default: 6)");
        println!("  DOCPOOL_WORKERS_RAG_QUERY     RAG query workers (default: 10)");
        println!("  DOCPOOL_WORKERS_EMBEDDING     Embedding workers (default: 3)");
        println!("  DOCPOOL_WORKERS_BATCH         Batch workers (default: 2)");
        println!("  DOCPOOL_WORKERS_MAINTENANCE   Maintenance workers (default: 1)");
        println!("  DOCPOOL_ACTIVITY_BUFFER       Activity ring size (default: 200)");
        println!("  DOCPOOL_QUEUE_SOFT_CAP        Per-category queue cap, 0 = off (default: 5000)");
        println!("  DOCPOOL_MAX_BACKOFF_SECS      Retry backoff ceiling (default: 30)");
        println!("  DOCPOOL_TASK_TIMEOUT_SECS     Per-task wall clock, 0 = off (default: off)");
        println!("  DOCPOOL_DRAIN_TIMEOUT_SECS    Shutdown drain window (default: 30)");
        println!("  DOCPOOL_BREAKER_<NAME>_FAILURE_THRESHOLD / _SUCCESS_THRESHOLD / _TIMEOUT_SECS");
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("docpool v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    let registry = Arc::new(FunctionRegistry::new());
    register_builtin_functions(&registry);

    let pool = Arc::new(WorkerPool::new(config.pool.clone(), registry));
    pool.start();

    let state = ApiState::new(Arc::clone(&pool), config.drain_timeout);
    ApiServer::new(config.http_addr, state).run().await
}

/// Smoke-test functions so an operator can exercise the pool end to end
/// before any real ingestion functions are wired in.
fn register_builtin_functions(registry: &FunctionRegistry) {
    // Returns its arguments unchanged.
    registry.register_fn("echo", |args| async move { Ok(args) });

    // Sleeps for `{"ms": N}` milliseconds.
    registry.register_fn("sleep", |args| async move {
        let ms = args["ms"].as_u64().unwrap_or(100);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!({ "slept_ms": ms }))
    });

    // Fails with `{"kind": "retryable"|"fatal", "message": ...}`, for
    // retry and breaker drills.
    registry.register_fn("fail", |args| async move {
        let message = args["message"].as_str().unwrap_or("requested failure");
        if args["kind"].as_str() == Some("fatal") {
            Err(TaskFailure::fatal(message))
        } else {
            Err(TaskFailure::retryable(message))
        }
    });
}
