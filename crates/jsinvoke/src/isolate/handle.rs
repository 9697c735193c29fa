//! A single sandbox instance
//!
//! An [`Isolate`] owns one QuickJS runtime and the context scripts run in.
//! It is not safe for concurrent use; exclusivity comes from ownership, the
//! pool moves isolates in and out and never shares them.

use rquickjs::{Context, Runtime};
use tracing::{debug, instrument};

use crate::isolate::IsolateError;
use crate::library::Library;
use crate::types::SandboxLimits;

/// An exclusively-owned script execution environment
pub struct Isolate {
    /// Isolate ID, stable across rehydrations
    id: u32,

    /// Limits applied to every runtime this isolate creates
    limits: SandboxLimits,

    runtime: Runtime,

    /// Global scope scripts run in; replaced on every rehydration
    context: Context,

    /// Number of times the library has been loaded into this isolate
    generation: u64,
}

impl std::fmt::Debug for Isolate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Isolate")
            .field("id", &self.id)
            .field("limits", &self.limits)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl Isolate {
    /// Create an isolate with an empty global scope
    #[instrument(skip(limits))]
    pub fn new(id: u32, limits: &SandboxLimits) -> Result<Self, IsolateError> {
        let runtime = new_runtime(limits)?;
        let context = Context::full(&runtime).map_err(IsolateError::Engine)?;

        debug!("isolate created");

        Ok(Self {
            id,
            limits: limits.clone(),
            runtime,
            context,
            generation: 0,
        })
    }

    /// Create an isolate and load the library into it
    pub fn with_library(
        id: u32,
        limits: &SandboxLimits,
        library: &Library,
    ) -> Result<Self, IsolateError> {
        let mut isolate = Self::new(id, limits)?;
        isolate.rehydrate(library)?;
        Ok(isolate)
    }

    /// Get the isolate ID
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Number of times the library has been loaded into this isolate
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The context holding the isolate's current global scope
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Replace the global scope with a fresh one holding only the library
    ///
    /// Entries are instantiated from their code cache; whatever the previous
    /// borrower left in the global scope is discarded.
    #[instrument(skip(self, library), fields(id = self.id, entries = library.len()))]
    pub fn rehydrate(&mut self, library: &Library) -> Result<(), IsolateError> {
        let context = Context::full(&self.runtime).map_err(IsolateError::Engine)?;
        context
            .with(|ctx| library.instantiate(&ctx))
            .map_err(|source| IsolateError::Rehydrate {
                id: self.id,
                source,
            })?;

        self.context = context;
        self.generation += 1;
        self.runtime.run_gc();

        debug!(generation = self.generation, "isolate rehydrated");
        Ok(())
    }

    /// Throw away the runtime and rebuild the isolate from scratch
    ///
    /// Used when a previous execution may have left the runtime itself in a
    /// bad state (a panic mid-run, a failed rehydration).
    #[instrument(skip(self, library), fields(id = self.id))]
    pub fn renew(&mut self, library: &Library) -> Result<(), IsolateError> {
        let runtime = new_runtime(&self.limits)?;
        let context = Context::full(&runtime).map_err(IsolateError::Engine)?;

        // Drop the old context before its runtime
        self.context = context;
        self.runtime = runtime;

        self.rehydrate(library)
    }
}

fn new_runtime(limits: &SandboxLimits) -> Result<Runtime, IsolateError> {
    let runtime = Runtime::new().map_err(IsolateError::Engine)?;
    if let Some(kb) = limits.memory_limit {
        runtime.set_memory_limit(kb_to_bytes(kb));
    }
    if let Some(kb) = limits.stack_limit {
        runtime.set_max_stack_size(kb_to_bytes(kb));
    }
    Ok(runtime)
}

fn kb_to_bytes(kb: u64) -> usize {
    usize::try_from(kb.saturating_mul(1024)).unwrap_or(usize::MAX)
}
