//! A library for running untrusted JavaScript snippets.
//!
//! jsinvoke provides an async Rust API for executing caller-supplied scripts
//! in pooled QuickJS isolates. Every isolate is preloaded with a shared
//! helper library and is rehydrated with a fresh global scope between
//! requests.
//!
//! # Features
//!
//! - **Pooled isolates**: A fixed set of sandboxes lent out one request at a time.
//! - **Script library**: Helper scripts precompiled once, instantiated from bytecode.
//! - **Admission control**: Concurrency ceiling plus a token-bucket rate limit.
//! - **Typed outcomes**: Results, empty results, script errors and engine faults kept apart.
//! - **TOML configuration**: With `JSINVOKE_*` environment overrides.

pub use admission::{Admission, AdmissionError, AdmissionPermit, RateLimiter};
pub use config::{Config, ConfigError, EXAMPLE_CONFIG};
pub use isolate::{Isolate, IsolateError, IsolatePool, PoolStats, PooledIsolate};
pub use library::{Library, LibraryEntry, LibrarySource, LoadError};
pub use runner::{ExecuteError, Runner, RunnerStats, StartError};
pub use types::{
    EMPTY_RESULT_MESSAGE, ErrorBody, ExecutionOutcome, ExecutionRequest, InputData,
    InvokeRequest, ResponseBody, ResultBody, SandboxLimits,
};

pub mod admission;
pub mod config;
pub mod isolate;
pub mod library;
pub mod runner;
pub mod types;
