//! Shared script library
//!
//! Helper scripts are compiled once at startup and kept as source plus
//! bytecode. Every isolate gets the whole library instantiated into its
//! global scope before it serves a request; the bytecode lets that happen
//! without reparsing.
//!
//! Entries run as plain global scripts: top-level `function` and `var`
//! declarations become globals, exactly as in a browser `<script>`.

use std::path::PathBuf;
use std::sync::Arc;

use rquickjs::{Ctx, Error as EngineError};
use thiserror::Error;
use tracing::debug;

use crate::isolate::{IsolateError, describe_exception};

mod bytecode;
mod loader;

/// Helper scripts compiled into the binary, in load order
pub const EMBEDDED_LIBRARY: &[(&str, &str)] = &[
    ("collections.js", include_str!("../../library/collections.js")),
    ("strings.js", include_str!("../../library/strings.js")),
];

/// File extension recognized as a library script
pub const SCRIPT_EXTENSION: &str = "js";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read library directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read library file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to compile library file '{name}': {message}")]
    Compile { name: String, message: String },

    #[error("failed to evaluate library file '{name}': {message}")]
    Evaluate { name: String, message: String },

    #[error("failed to create loader isolate: {0}")]
    Isolate(#[source] Box<IsolateError>),
}

/// Where library scripts are read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibrarySource {
    /// The helpers embedded in the binary
    Embedded,

    /// Every `.js` file under a directory, walked recursively in lexical order
    Directory(PathBuf),
}

/// One compiled helper script
#[derive(Debug, Clone)]
pub struct LibraryEntry {
    name: String,
    source: String,
    code_cache: Vec<u8>,
}

impl LibraryEntry {
    /// Name of the script, relative to the library root
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Script source text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Serialized bytecode produced when the entry was loaded
    pub fn code_cache(&self) -> &[u8] {
        &self.code_cache
    }

    /// Instantiate the entry into the context's global scope
    ///
    /// A code cache the engine refuses is not an error: the entry is compiled
    /// from source instead.
    fn instantiate(&self, ctx: &Ctx<'_>) -> Result<(), LoadError> {
        // SAFETY: the bytes were written by `bytecode::compile` in this process.
        match unsafe { bytecode::run(ctx, &self.code_cache) } {
            Ok(()) => Ok(()),
            Err(bytecode::RunError::Threw) => Err(self.evaluate_failed(ctx)),
            Err(bytecode::RunError::Rejected) => {
                let reason = describe_exception(ctx, EngineError::Exception);
                debug!(name = %self.name, %reason, "code cache rejected, compiling from source");
                let fresh = bytecode::compile(ctx, &self.name, &self.source).map_err(|error| {
                    LoadError::Compile {
                        name: self.name.clone(),
                        message: describe_exception(ctx, error),
                    }
                })?;
                // SAFETY: just written by `bytecode::compile`.
                unsafe { bytecode::run(ctx, &fresh) }
                    .map_err(|_| self.evaluate_failed(ctx))
            }
        }
    }

    /// The body threw; the exception is still pending on `ctx`
    fn evaluate_failed(&self, ctx: &Ctx<'_>) -> LoadError {
        LoadError::Evaluate {
            name: self.name.clone(),
            message: describe_exception(ctx, EngineError::Exception),
        }
    }
}

/// The ordered, immutable set of helper scripts
///
/// Cloning is cheap; all clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct Library {
    entries: Arc<[LibraryEntry]>,
}

impl Library {
    /// A library with no entries
    pub fn empty() -> Self {
        Self::default()
    }

    /// Entries in load order
    pub fn entries(&self) -> &[LibraryEntry] {
        &self.entries
    }

    /// Look up an entry by name
    pub fn get(&self, name: &str) -> Option<&LibraryEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Instantiate every entry, in order, into the context's global scope
    pub(crate) fn instantiate(&self, ctx: &Ctx<'_>) -> Result<(), LoadError> {
        self.entries
            .iter()
            .try_for_each(|entry| entry.instantiate(ctx))
    }
}
