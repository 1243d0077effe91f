//! Narrow host interface used by readers.
//!
//! Readers never hold a reference back into the compositing graph. What
//! they need (cancellation, error reporting, a thread budget and memory
//! accounting) comes through the [`Host`] trait. [`RecordingHost`] is a
//! self-contained implementation for tools and tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Shared cancellation flag. Raising it is idempotent.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    /// New, lowered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Services a reader consumes from its host.
pub trait Host: Send + Sync {
    /// Polled at row/line granularity; `true` stops decoding.
    fn aborted(&self) -> bool {
        false
    }

    /// Reports a user-visible error.
    fn error(&self, message: &str);

    /// Reports a user-visible warning.
    fn warning(&self, _message: &str) {}

    /// Worker threads the host runs decode calls on.
    fn thread_count(&self) -> usize {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    }

    /// Records that `owner` now holds `bytes` of reclaimable memory.
    fn register_memory(&self, _owner: &str, _bytes: usize) {}

    /// Records that `owner` released `bytes`.
    fn release_memory(&self, _owner: &str, _bytes: usize) {}
}

/// [`Host`] that records everything it is told.
#[derive(Debug, Default)]
pub struct RecordingHost {
    abort: AbortFlag,
    threads: usize,
    errors: Mutex<Vec<String>>,
    warnings: Mutex<Vec<String>>,
    memory: AtomicUsize,
}

impl RecordingHost {
    /// Host with the machine's available parallelism.
    pub fn new() -> Self {
        Self::default()
    }

    /// Host reporting a fixed worker count.
    pub fn with_threads(threads: usize) -> Self {
        Self { threads, ..Self::default() }
    }

    /// The flag this host answers [`Host::aborted`] with.
    pub fn abort_flag(&self) -> AbortFlag {
        self.abort.clone()
    }

    /// Errors reported so far.
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Warnings reported so far.
    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Bytes currently registered through the memory hook.
    pub fn registered_memory(&self) -> usize {
        self.memory.load(Ordering::Acquire)
    }
}

impl Host for RecordingHost {
    fn aborted(&self) -> bool {
        self.abort.is_raised()
    }

    fn error(&self, message: &str) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(message.to_string());
        }
    }

    fn warning(&self, message: &str) {
        if let Ok(mut warnings) = self.warnings.lock() {
            warnings.push(message.to_string());
        }
    }

    fn thread_count(&self) -> usize {
        if self.threads > 0 {
            self.threads
        } else {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        }
    }

    fn register_memory(&self, _owner: &str, bytes: usize) {
        self.memory.fetch_add(bytes, Ordering::AcqRel);
    }

    fn release_memory(&self, _owner: &str, bytes: usize) {
        let _ = self
            .memory
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |m| Some(m.saturating_sub(bytes)));
    }
}
