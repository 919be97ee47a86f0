//! Worker thread pool for pipeline runs
//!
//! Every engine stage parallelizes with rayon. Pipeline runs install this
//! pool around the whole run so the stages share it; its size comes from
//! the `LODCRATE_THREADS` environment variable unless configured in code.

use lodcrate_core::{Error, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::{Arc, Mutex, OnceLock};

/// Environment variable holding the worker thread count
pub const THREADS_ENV: &str = "LODCRATE_THREADS";

static GLOBAL_THREAD_POOL: OnceLock<Arc<ThreadPool>> = OnceLock::new();
static THREAD_POOL_CONFIG: Mutex<Option<ThreadPoolConfig>> = Mutex::new(None);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadPoolConfig {
    /// Number of threads (None = rayon default)
    pub num_threads: Option<usize>,
    /// Thread stack size in bytes
    pub stack_size: Option<usize>,
    pub thread_name_prefix: String,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            stack_size: Some(8 * 1024 * 1024),
            thread_name_prefix: "lodcrate-worker".to_string(),
        }
    }
}

impl ThreadPoolConfig {
    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    /// Default configuration with the thread count taken from
    /// `LODCRATE_THREADS` when it holds a positive integer
    pub fn from_env() -> Self {
        let config = Self::default();
        match std::env::var(THREADS_ENV) {
            Ok(value) => match parse_thread_count(&value) {
                Some(threads) => config.with_threads(threads),
                None => {
                    tracing::warn!("ignoring {}={:?}, expected a positive integer", THREADS_ENV, value);
                    config
                }
            },
            Err(_) => config,
        }
    }

    fn build(&self) -> Result<ThreadPool> {
        let mut builder = ThreadPoolBuilder::new();
        if let Some(num_threads) = self.num_threads {
            builder = builder.num_threads(num_threads);
        }
        if let Some(stack_size) = self.stack_size {
            builder = builder.stack_size(stack_size);
        }
        if !self.thread_name_prefix.is_empty() {
            let prefix = self.thread_name_prefix.clone();
            builder = builder.thread_name(move |index| format!("{}-{}", prefix, index));
        }
        builder
            .build()
            .map_err(|e| Error::Algorithm(format!("failed to create thread pool: {}", e)))
    }
}

fn parse_thread_count(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok().filter(|&n| n > 0)
}

/// Initialize the shared pool. Only the first call has an effect.
pub fn init_thread_pool(config: ThreadPoolConfig) -> Result<()> {
    if GLOBAL_THREAD_POOL.get().is_some() {
        return Ok(());
    }
    let pool = config.build()?;
    tracing::debug!("worker pool with {} threads", pool.current_num_threads());
    if let Ok(mut stored) = THREAD_POOL_CONFIG.lock() {
        *stored = Some(config);
    }
    // Losing a race to another initializer is fine, its pool is used
    let _ = GLOBAL_THREAD_POOL.set(Arc::new(pool));
    Ok(())
}

/// The shared pool, initialized from the environment on first use
pub fn thread_pool() -> Result<Arc<ThreadPool>> {
    if let Some(pool) = GLOBAL_THREAD_POOL.get() {
        return Ok(pool.clone());
    }
    init_thread_pool(ThreadPoolConfig::from_env())?;
    GLOBAL_THREAD_POOL
        .get()
        .cloned()
        .ok_or_else(|| Error::Algorithm("thread pool was not initialized".to_string()))
}

/// Configuration the shared pool was built with, if it was built
pub fn thread_pool_config() -> Option<ThreadPoolConfig> {
    THREAD_POOL_CONFIG.lock().ok().and_then(|config| config.clone())
}

/// Run `op` inside the shared pool
pub fn execute_parallel<F, R>(op: F) -> Result<R>
where
    F: FnOnce() -> R + Send,
    R: Send,
{
    Ok(thread_pool()?.install(op))
}
