//! Script runner for jsinvoke
//!
//! Provides the high-level API: start a runner from a [`Config`], execute
//! requests through admission and the isolate pool, stop it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, instrument};

pub use crate::runner::execute::DATA_GLOBAL;

mod execute;

use crate::{
    admission::{Admission, AdmissionError, AdmissionPermit},
    config::Config,
    isolate::{IsolateError, IsolatePool, PoolStats, PooledIsolate},
    library::{Library, LoadError},
    types::{ExecutionOutcome, ExecutionRequest},
};

/// Errors that occur before a request reaches a sandbox
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("{0}")]
    Validation(String),

    #[error("service is shutting down")]
    ShuttingDown,

    #[error("no sandbox available within {0:?}")]
    Timeout(Duration),
}

impl From<AdmissionError> for ExecuteError {
    fn from(error: AdmissionError) -> Self {
        match error {
            AdmissionError::ShuttingDown => ExecuteError::ShuttingDown,
        }
    }
}

/// Errors that occur while starting a runner
#[derive(Debug, Error)]
pub enum StartError {
    #[error("failed to load script library: {0}")]
    Library(#[from] LoadError),

    #[error("failed to create isolate pool: {0}")]
    Pool(#[from] IsolateError),

    #[error("startup task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Point-in-time view of a runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerStats {
    /// Executions currently holding an admission slot
    pub in_flight: usize,
    /// Configured concurrency ceiling
    pub concurrency: usize,
    pub pool: PoolStats,
}

/// High-level runner for script execution
///
/// Cloning is cheap; clones share the same pool and admission state.
#[derive(Debug, Clone)]
pub struct Runner {
    config: Arc<Config>,
    admission: Arc<Admission>,
    pool: IsolatePool,
}

impl Runner {
    /// Load the library and fill the isolate pool
    ///
    /// Runs on the blocking thread pool; any library or isolate failure
    /// aborts startup.
    #[instrument(skip(config), fields(pool_size = config.pool_size))]
    pub async fn start(config: Config) -> Result<Self, StartError> {
        let started = Instant::now();
        let source = config.library_source();
        let limits = config.limits.clone();
        let pool_size = config.pool_size;

        let pool = tokio::task::spawn_blocking(move || -> Result<IsolatePool, StartError> {
            let library = Library::load(&source, &limits)?;
            Ok(IsolatePool::new(pool_size, library, &limits)?)
        })
        .await??;

        let admission = Admission::new(
            config.concurrency,
            config.rate_limit,
            config.effective_burst(),
        );

        info!(
            pool_size,
            concurrency = config.concurrency,
            rate_limit = config.rate_limit,
            library = pool.library().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "runner started"
        );

        Ok(Self {
            config: Arc::new(config),
            admission: Arc::new(admission),
            pool,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The loaded script library
    pub fn library(&self) -> &Library {
        self.pool.library()
    }

    /// Run one script
    ///
    /// Script failures, empty results and engine faults are outcomes, not
    /// errors; `Err` means the request never reached a sandbox.
    #[instrument(skip_all, fields(script_len = request.script.len(), has_data = request.data.is_some()))]
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionOutcome, ExecuteError> {
        if request.script.is_empty() {
            return Err(ExecuteError::Validation("script is required".to_string()));
        }

        let (permit, isolate) = match self.config.acquire_timeout() {
            Some(limit) => tokio::time::timeout(limit, self.acquire())
                .await
                .map_err(|_| ExecuteError::Timeout(limit))??,
            None => self.acquire().await?,
        };

        let started = Instant::now();
        let outcome = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let mut isolate = isolate;
            let outcome = execute::run_script(&isolate, &request);
            if matches!(outcome, ExecutionOutcome::InternalError { .. }) {
                isolate.taint();
            }
            outcome
        })
        .await
        .unwrap_or_else(|error| ExecutionOutcome::InternalError {
            message: format!("script execution aborted: {error}"),
        });

        debug!(
            success = outcome.is_success(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "script finished"
        );
        Ok(outcome)
    }

    /// Admission first, then an isolate; the slot is released if borrowing fails
    async fn acquire(&self) -> Result<(AdmissionPermit, PooledIsolate), ExecuteError> {
        let permit = self.admission.admit().await?;
        // Borrowing only fails once the pool is draining
        let isolate = self
            .pool
            .borrow()
            .await
            .map_err(|_| ExecuteError::ShuttingDown)?;
        Ok((permit, isolate))
    }

    /// Refuse new executions and dispose every isolate
    ///
    /// Executions already running finish first.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        self.admission.close();
        self.pool.drain().await;
        info!("runner stopped");
    }

    pub fn stats(&self) -> RunnerStats {
        RunnerStats {
            in_flight: self.admission.in_flight(),
            concurrency: self.admission.concurrency(),
            pool: self.pool.stats(),
        }
    }
}
