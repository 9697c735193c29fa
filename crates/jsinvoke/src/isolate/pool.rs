//! Isolate pool
//!
//! A fixed set of isolates lent out one request at a time. Borrowing waits
//! for an idle isolate; returning one rehydrates it on the blocking thread
//! pool before it becomes available again, so a borrowed isolate is always
//! library-ready.
//!
//! An isolate that cannot be recycled is replaced by a freshly built one,
//! retried with backoff until it succeeds or the pool drains, so failures
//! never shrink the pool.

use std::ops::{Deref, DerefMut};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, instrument, warn};

use crate::isolate::{Isolate, IsolateError};
use crate::library::Library;
use crate::types::SandboxLimits;

/// First wait between attempts to replace a broken isolate
const REPLACE_BACKOFF_MIN: Duration = Duration::from_millis(10);

/// Longest wait between attempts to replace a broken isolate
const REPLACE_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Point-in-time view of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Configured number of isolates
    pub capacity: usize,
    /// Isolates ready to be borrowed
    pub idle: usize,
    /// Isolates currently held by a borrower
    pub on_loan: usize,
    /// Isolates returned and being rehydrated or replaced
    pub recycling: usize,
    /// Isolates permanently disposed
    pub disposed: usize,
    /// Highest number of isolates ever on loan at once
    pub peak_on_loan: usize,
}

#[derive(Debug, Default)]
struct PoolState {
    idle: Vec<Isolate>,
    draining: bool,
    disposed: usize,
}

#[derive(Debug)]
struct PoolInner {
    capacity: usize,
    library: Library,
    limits: SandboxLimits,

    /// One permit per idle isolate
    available: Semaphore,

    state: Mutex<PoolState>,
    on_loan: AtomicUsize,
    peak_on_loan: AtomicUsize,

    /// Signalled whenever an isolate is disposed
    disposed: Notify,

    #[cfg(test)]
    faults: Mutex<Vec<tests::Fault>>,
}

/// Pool of isolates for concurrent execution
///
/// Cloning is cheap; clones share the same isolates.
#[derive(Debug, Clone)]
pub struct IsolatePool {
    inner: Arc<PoolInner>,
}

impl IsolatePool {
    /// Create `size` isolates, each with the library loaded
    #[instrument(skip(library, limits))]
    pub fn new(
        size: usize,
        library: Library,
        limits: &SandboxLimits,
    ) -> Result<Self, IsolateError> {
        let count = u32::try_from(size)
            .ok()
            .filter(|count| *count > 0)
            .ok_or(IsolateError::InvalidPoolSize(size))?;

        let idle = (0..count)
            .map(|id| Isolate::with_library(id, limits, &library))
            .collect::<Result<Vec<_>, _>>()?;

        info!(size, library = library.len(), "isolate pool ready");

        Ok(Self {
            inner: Arc::new(PoolInner {
                capacity: size,
                library,
                limits: limits.clone(),
                available: Semaphore::new(size),
                state: Mutex::new(PoolState {
                    idle,
                    ..Default::default()
                }),
                on_loan: AtomicUsize::new(0),
                peak_on_loan: AtomicUsize::new(0),
                disposed: Notify::new(),
                #[cfg(test)]
                faults: Mutex::default(),
            }),
        })
    }

    /// Take an isolate, waiting until one is idle
    ///
    /// Waiting is unbounded and cancellation-safe. Fails with
    /// [`IsolateError::ShuttingDown`] once [`drain`](Self::drain) has started.
    pub async fn borrow(&self) -> Result<PooledIsolate, IsolateError> {
        let permit = self
            .inner
            .available
            .acquire()
            .await
            .map_err(|_| IsolateError::ShuttingDown)?;
        permit.forget();

        // A permit can race a drain that already took the idle isolates
        let isolate = self
            .inner
            .state
            .lock()
            .idle
            .pop()
            .ok_or(IsolateError::ShuttingDown)?;

        let on_loan = self.inner.on_loan.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak_on_loan.fetch_max(on_loan, Ordering::SeqCst);
        debug!(id = isolate.id(), on_loan, "borrowed isolate");

        Ok(PooledIsolate {
            isolate: Some(isolate),
            pool: Arc::clone(&self.inner),
            tainted: false,
        })
    }

    /// Return a borrowed isolate
    ///
    /// Equivalent to dropping it.
    pub fn release(&self, isolate: PooledIsolate) {
        drop(isolate);
    }

    /// Stop lending isolates and dispose all of them
    ///
    /// Idle isolates are disposed immediately, borrowed ones as they come
    /// back. Pending and future borrows fail with `ShuttingDown`. Resolves
    /// once every isolate has been disposed.
    #[instrument(skip(self))]
    pub async fn drain(&self) {
        let idle = {
            let mut state = self.inner.state.lock();
            state.draining = true;
            let idle = std::mem::take(&mut state.idle);
            state.disposed += idle.len();
            idle
        };
        self.inner.available.close();

        info!(idle = idle.len(), "draining isolate pool");
        drop(idle);
        self.inner.disposed.notify_waiters();

        loop {
            let disposed = self.inner.disposed.notified();
            if self.is_drained() {
                break;
            }
            disposed.await;
        }

        info!(disposed = self.inner.capacity, "isolate pool drained");
    }

    /// Whether every isolate has been disposed
    pub fn is_drained(&self) -> bool {
        self.inner.state.lock().disposed >= self.inner.capacity
    }

    /// The library isolates are rehydrated with
    pub fn library(&self) -> &Library {
        &self.inner.library
    }

    /// Get the total number of isolates in the pool
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Get the number of idle isolates
    pub fn available(&self) -> usize {
        self.inner.available.available_permits()
    }

    pub fn stats(&self) -> PoolStats {
        let (idle, disposed) = {
            let state = self.inner.state.lock();
            (state.idle.len(), state.disposed)
        };
        let on_loan = self.inner.on_loan.load(Ordering::SeqCst);
        PoolStats {
            capacity: self.inner.capacity,
            idle,
            on_loan,
            recycling: self
                .inner
                .capacity
                .saturating_sub(idle + on_loan + disposed),
            disposed,
            peak_on_loan: self.inner.peak_on_loan.load(Ordering::SeqCst),
        }
    }
}

impl PoolInner {
    /// Take an isolate back from a borrower
    fn give_back(self: &Arc<Self>, isolate: Isolate, renew: bool) {
        self.on_loan.fetch_sub(1, Ordering::SeqCst);

        if self.state.lock().draining {
            self.dispose(isolate);
            return;
        }

        let pool = Arc::clone(self);
        let recycle = move || pool.recycle(isolate, renew);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(recycle);
            }
            Err(_) => recycle(),
        }
    }

    /// Rehydrate an isolate and make it available again
    ///
    /// Falls back to a new runtime, then to a replacement isolate. A panic
    /// while rehydrating is treated like any other failure.
    fn recycle(&self, mut isolate: Isolate, renew: bool) {
        let id = isolate.id();
        let refreshed = panic::catch_unwind(AssertUnwindSafe(|| self.refresh(&mut isolate, renew)));
        match refreshed {
            Ok(Ok(())) => self.make_available(isolate),
            Ok(Err(error)) => {
                error!(id, %error, "failed to recycle isolate, replacing it");
                drop(isolate);
                self.replace(id);
            }
            Err(_) => {
                error!(id, "recycling panicked, replacing isolate");
                drop(isolate);
                self.replace(id);
            }
        }
    }

    fn refresh(&self, isolate: &mut Isolate, renew: bool) -> Result<(), IsolateError> {
        #[cfg(test)]
        self.inject_fault(isolate.id())?;

        if renew {
            isolate.renew(&self.library)
        } else {
            isolate.rehydrate(&self.library).or_else(|error| {
                warn!(id = isolate.id(), %error, "rehydration failed, renewing isolate");
                isolate.renew(&self.library)
            })
        }
    }

    /// Build a new isolate under `id`, retrying until it works or the pool drains
    ///
    /// Runs on a blocking thread, which it holds while backing off.
    fn replace(&self, id: u32) {
        let mut delay = REPLACE_BACKOFF_MIN;
        loop {
            if self.state.lock().draining {
                self.count_disposed(id);
                return;
            }

            let built = panic::catch_unwind(AssertUnwindSafe(|| self.build(id)));
            match built {
                Ok(Ok(isolate)) => {
                    info!(id, "isolate replaced");
                    self.make_available(isolate);
                    return;
                }
                Ok(Err(error)) => warn!(id, %error, ?delay, "failed to replace isolate, retrying"),
                Err(_) => warn!(id, ?delay, "replacing isolate panicked, retrying"),
            }

            std::thread::sleep(delay);
            delay = (delay * 2).min(REPLACE_BACKOFF_MAX);
        }
    }

    fn build(&self, id: u32) -> Result<Isolate, IsolateError> {
        #[cfg(test)]
        self.inject_fault(id)?;

        Isolate::with_library(id, &self.limits, &self.library)
    }

    /// Put a ready isolate back in the idle set, unless the pool is draining
    fn make_available(&self, isolate: Isolate) {
        let mut state = self.state.lock();
        if state.draining {
            drop(state);
            self.dispose(isolate);
            return;
        }
        debug!(id = isolate.id(), "isolate available");
        state.idle.push(isolate);
        self.available.add_permits(1);
    }

    fn dispose(&self, isolate: Isolate) {
        let id = isolate.id();
        drop(isolate);
        self.count_disposed(id);
    }

    fn count_disposed(&self, id: u32) {
        let disposed = {
            let mut state = self.state.lock();
            state.disposed += 1;
            state.disposed
        };
        debug!(id, disposed, "isolate disposed");
        self.disposed.notify_waiters();
    }

    #[cfg(test)]
    fn inject_fault(&self, id: u32) -> Result<(), IsolateError> {
        let fault = {
            let mut faults = self.faults.lock();
            if faults.is_empty() {
                return Ok(());
            }
            faults.remove(0)
        };
        match fault {
            tests::Fault::Fail => Err(IsolateError::Rehydrate {
                id,
                source: crate::library::LoadError::Evaluate {
                    name: "fault.js".to_string(),
                    message: "injected failure".to_string(),
                },
            }),
            tests::Fault::Panic => panic!("injected panic while recycling isolate {id}"),
        }
    }
}

/// An isolate on loan from an [`IsolatePool`]
///
/// Dropping it hands the isolate back, on every path including unwinding.
/// An isolate dropped during a panic, or explicitly [tainted](Self::taint),
/// gets a brand new runtime instead of a plain rehydration.
#[derive(Debug)]
pub struct PooledIsolate {
    isolate: Option<Isolate>,
    pool: Arc<PoolInner>,
    tainted: bool,
}

impl PooledIsolate {
    /// Mark the runtime as untrustworthy so it is rebuilt on return
    pub fn taint(&mut self) {
        self.tainted = true;
    }
}

impl Deref for PooledIsolate {
    type Target = Isolate;

    fn deref(&self) -> &Isolate {
        self.isolate
            .as_ref()
            .expect("pooled isolate is present until dropped")
    }
}

impl DerefMut for PooledIsolate {
    fn deref_mut(&mut self) -> &mut Isolate {
        self.isolate
            .as_mut()
            .expect("pooled isolate is present until dropped")
    }
}

impl Drop for PooledIsolate {
    fn drop(&mut self) {
        if let Some(isolate) = self.isolate.take() {
            let renew = self.tainted || std::thread::panicking();
            self.pool.give_back(isolate, renew);
        }
    }
}
