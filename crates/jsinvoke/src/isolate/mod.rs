//! QuickJS sandbox instances
//!
//! This module provides the sandbox handle ([`Isolate`]), the bounded pool
//! that lends isolates to executions ([`IsolatePool`]), and the helpers that
//! turn engine exceptions into plain data.

use thiserror::Error;

pub use crate::isolate::exception::{Thrown, describe as describe_exception, first_frame_location};
pub use crate::isolate::handle::Isolate;
pub use crate::isolate::pool::{IsolatePool, PoolStats, PooledIsolate};
use crate::library::LoadError;

mod exception;
mod handle;
mod pool;

/// Errors that occur during isolate operations
#[derive(Debug, Error)]
pub enum IsolateError {
    #[error("script engine error: {0}")]
    Engine(#[source] rquickjs::Error),

    #[error("failed to rehydrate isolate {id}: {source}")]
    Rehydrate {
        id: u32,
        #[source]
        source: LoadError,
    },

    #[error("invalid pool size {0}: must be between 1 and {max}", max = u32::MAX)]
    InvalidPoolSize(usize),

    #[error("isolate pool is shutting down")]
    ShuttingDown,
}
