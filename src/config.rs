//! Configuration management
//!
//! The pool takes its worker counts and breaker parameters from a single
//! configuration value built at startup. Tests construct configs directly;
//! the binary loads overrides from `DOCPOOL_*` environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;

use crate::breaker::{default_breakers, BreakerConfig};
use crate::task::TaskCategory;

/// Worker slots per category. The defaults reflect measured throughput
/// needs: RAG queries must clear quickly so headroom is generous, scraping
/// is bounded by politeness, embedding is API-bound, batch and maintenance
/// tolerate queuing.
#[derive(Debug, Clone)]
pub struct WorkerCounts {
    pub scraping: usize,
    pub rag_query: usize,
    pub embedding: usize,
    pub batch: usize,
    pub maintenance: usize,
}

impl Default for WorkerCounts {
    fn default() -> Self {
        Self {
            scraping: 6,
            rag_query: 10,
            embedding: 3,
            batch: 2,
            maintenance: 1,
        }
    }
}

impl WorkerCounts {
    pub fn for_category(&self, category: TaskCategory) -> usize {
        match category {
            TaskCategory::Scraping => self.scraping,
            TaskCategory::RagQuery => self.rag_query,
            TaskCategory::Embedding => self.embedding,
            TaskCategory::Batch => self.batch,
            TaskCategory::Maintenance => self.maintenance,
        }
    }

    pub fn total(&self) -> usize {
        self.scraping + self.rag_query + self.embedding + self.batch + self.maintenance
    }
}

/// Engine configuration, injected into [`crate::pool::WorkerPool::new`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: WorkerCounts,
    /// Breakers registered at `start()`.
    pub breakers: Vec<BreakerConfig>,
    /// Activity ring buffer capacity.
    pub activity_buffer: usize,
    /// Cap on the exponential retry backoff.
    pub max_backoff: Duration,
    /// Soft cap per category queue; 0 disables the cap.
    pub queue_soft_cap: usize,
    /// Optional wall-clock bound per attempt; off by default.
    pub task_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: WorkerCounts::default(),
            breakers: default_breakers(),
            activity_buffer: 200,
            max_backoff: Duration::from_secs(30),
            queue_soft_cap: 5000,
            task_timeout: None,
        }
    }
}

/// Process configuration: the engine plus its HTTP surface.
#[derive(Debug, Clone)]
pub struct Config {
    pub pool: PoolConfig,
    /// Bind address for the operator API.
    pub http_addr: SocketAddr,
    /// Drain window applied on process shutdown.
    pub drain_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            http_addr: ([127, 0, 0, 1], 8088).into(),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to the
    /// documented defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        config.pool.workers.scraping = env_usize("DOCPOOL_WORKERS_SCRAPING", config.pool.workers.scraping);
        config.pool.workers.rag_query = env_usize("DOCPOOL_WORKERS_RAG_QUERY", config.pool.workers.rag_query);
        config.pool.workers.embedding = env_usize("DOCPOOL_WORKERS_EMBEDDING", config.pool.workers.embedding);
        config.pool.workers.batch = env_usize("DOCPOOL_WORKERS_BATCH", config.pool.workers.batch);
        config.pool.workers.maintenance = env_usize("DOCPOOL_WORKERS_MAINTENANCE", config.pool.workers.maintenance);

        config.pool.activity_buffer = env_usize("DOCPOOL_ACTIVITY_BUFFER", config.pool.activity_buffer);
        config.pool.queue_soft_cap = env_usize("DOCPOOL_QUEUE_SOFT_CAP", config.pool.queue_soft_cap);

        if let Some(secs) = env_u64("DOCPOOL_MAX_BACKOFF_SECS") {
            config.pool.max_backoff = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("DOCPOOL_TASK_TIMEOUT_SECS") {
            config.pool.task_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(secs) = env_u64("DOCPOOL_DRAIN_TIMEOUT_SECS") {
            config.drain_timeout = Duration::from_secs(secs);
        }

        // Per-breaker overrides, e.g. DOCPOOL_BREAKER_OPENAI_FAILURE_THRESHOLD.
        for breaker in &mut config.pool.breakers {
            let prefix = format!("DOCPOOL_BREAKER_{}", breaker.name.to_uppercase());
            if let Some(v) = env_u64(&format!("{prefix}_FAILURE_THRESHOLD")) {
                breaker.failure_threshold = v as u32;
            }
            if let Some(v) = env_u64(&format!("{prefix}_SUCCESS_THRESHOLD")) {
                breaker.success_threshold = v as u32;
            }
            if let Some(v) = env_u64(&format!("{prefix}_TIMEOUT_SECS")) {
                breaker.timeout = Duration::from_secs(v);
            }
        }

        if let Ok(addr) = std::env::var("DOCPOOL_HTTP_ADDR") {
            config.http_addr = addr
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid DOCPOOL_HTTP_ADDR '{addr}': {e}"))?;
        }

        Ok(config)
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_worker_counts() {
        let counts = WorkerCounts::default();
        assert_eq!(counts.for_category(TaskCategory::Scraping), 6);
        assert_eq!(counts.for_category(TaskCategory::RagQuery), 10);
        assert_eq!(counts.for_category(TaskCategory::Embedding), 3);
        assert_eq!(counts.for_category(TaskCategory::Batch), 2);
        assert_eq!(counts.for_category(TaskCategory::Maintenance), 1);
        assert_eq!(counts.total(), 22);
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.pool.activity_buffer, 200);
        assert_eq!(config.pool.max_backoff, Duration::from_secs(30));
        assert_eq!(config.pool.queue_soft_cap, 5000);
        assert!(config.pool.task_timeout.is_none());
        assert_eq!(config.pool.breakers.len(), 3);
    }
}
