//! Minimal clean-up-closure list shared by every long-lived service
//! (listener, UDP relay, node allocator): each service carries a list
//! of clean-up closures and a closed flag guarded by a mutex. Close is
//! idempotent, runs closures in insertion order, collects errors, and
//! does not short-circuit on first failure.

use std::sync::Mutex;

type CleanupFn = Box<dyn FnOnce() -> std::result::Result<(), String> + Send>;

pub struct Disposer {
    inner: Mutex<DisposerState>,
}

struct DisposerState {
    closed: bool,
    cleanups: Vec<CleanupFn>,
}

impl Default for Disposer {
    fn default() -> Self {
        Self::new()
    }
}

impl Disposer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(DisposerState {
                closed: false,
                cleanups: Vec::new(),
            }),
        }
    }

    /// Register a clean-up closure. Closures run in insertion order on
    /// the first `close()` call. Registering after close is a no-op —
    /// the closure is dropped immediately rather than run, since the
    /// service it would clean up has already been torn down.
    pub fn register(&self, cleanup: impl FnOnce() -> std::result::Result<(), String> + Send + 'static) {
        let mut state = self.inner.lock().unwrap();
        if state.closed {
            return;
        }
        state.cleanups.push(Box::new(cleanup));
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    /// Idempotent. Runs every registered closure exactly once across the
    /// lifetime of this `Disposer`, even if some fail.
    pub fn close(&self) -> Vec<String> {
        let cleanups = {
            let mut state = self.inner.lock().unwrap();
            if state.closed {
                return Vec::new();
            }
            state.closed = true;
            std::mem::take(&mut state.cleanups)
        };

        let mut errors = Vec::new();
        for cleanup in cleanups {
            if let Err(e) = cleanup() {
                errors.push(e);
            }
        }
        errors
    }
}
