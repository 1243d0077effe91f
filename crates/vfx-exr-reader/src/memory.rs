//! Reclaimable memory.
//!
//! Two kinds of memory can be handed back to the host under pressure: the
//! per-thread scratch buffers raw chunks are read into, and the whole-file
//! buffer of a buffered source stream. Both are protected by a
//! [`UsageGuard`]: decoders hold a scoped token while they touch the memory,
//! and a reclaim raises the *locked* flag so new entrants take a fallback
//! path that does not need it.

use std::collections::HashMap;
use std::hint;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use tracing::debug;
use vfx_core::Host;

/// Owner tag reported to the host for scratch buffers.
pub const SCRATCH_OWNER: &str = "exr scratch";
/// Owner tag reported to the host for whole-file buffers.
pub const FILE_BUFFER_OWNER: &str = "exr file buffer";

/// User count plus a locked flag.
#[derive(Debug, Default)]
pub struct UsageGuard {
    users: AtomicUsize,
    locked: AtomicBool,
}

impl UsageGuard {
    /// New, unlocked guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user, or returns `None` while the memory is being freed.
    pub fn enter(&self) -> Option<UsageToken<'_>> {
        self.users.fetch_add(1, Ordering::SeqCst);
        if self.locked.load(Ordering::SeqCst) {
            self.users.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(UsageToken { guard: self })
    }

    /// Current number of users.
    pub fn users(&self) -> usize {
        self.users.load(Ordering::SeqCst)
    }

    /// Whether a free is in progress.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    /// Raises the locked flag. Returns `false` if it was already raised.
    pub fn lock(&self) -> bool {
        !self.locked.swap(true, Ordering::SeqCst)
    }

    /// Lowers the locked flag.
    pub fn unlock(&self) {
        self.locked.store(false, Ordering::SeqCst);
    }

    /// Spins until every user has left. Call after [`lock`](Self::lock).
    pub fn wait_idle(&self) {
        while self.users.load(Ordering::SeqCst) != 0 {
            hint::spin_loop();
            thread::yield_now();
        }
    }
}

/// Scoped registration with a [`UsageGuard`].
#[derive(Debug)]
pub struct UsageToken<'a> {
    guard: &'a UsageGuard,
}

impl UsageToken<'_> {
    /// Leaves the guard and returns how many users remain.
    fn leave(self) -> usize {
        let remaining = self.guard.users.fetch_sub(1, Ordering::SeqCst) - 1;
        std::mem::forget(self);
        remaining
    }
}

impl Drop for UsageToken<'_> {
    fn drop(&mut self) {
        self.guard.users.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Buffer lent to one thread.
pub type ScratchBuffer = Arc<Mutex<Vec<u8>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-thread scratch buffers keyed by [`ThreadId`].
pub struct ScratchPool {
    guard: UsageGuard,
    buffers: Mutex<HashMap<ThreadId, ScratchBuffer>>,
    registered: AtomicUsize,
    host: Arc<dyn Host>,
}

impl std::fmt::Debug for ScratchPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchPool")
            .field("guard", &self.guard)
            .field("registered", &self.registered)
            .finish_non_exhaustive()
    }
}

/// A thread's claim on its scratch buffer.
#[derive(Debug)]
pub struct ScratchLease<'a> {
    pool: &'a ScratchPool,
    token: Option<UsageToken<'a>>,
    buffer: ScratchBuffer,
}

impl ScratchLease<'_> {
    /// Runs `f` on the buffer, resized to `len` bytes.
    pub fn with<R>(&self, len: usize, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut buffer = lock(&self.buffer);
        if buffer.len() < len {
            let grow = len - buffer.len();
            buffer.resize(len, 0);
            if self.token.is_some() {
                self.pool.registered.fetch_add(grow, Ordering::SeqCst);
                self.pool.host.register_memory(SCRATCH_OWNER, grow);
            }
        }
        f(&mut buffer[..len])
    }

    /// Read access to the first `len` bytes.
    pub fn read<R>(&self, len: usize, f: impl FnOnce(&[u8]) -> R) -> R {
        let buffer = lock(&self.buffer);
        f(&buffer[..len.min(buffer.len())])
    }
}

impl Drop for ScratchLease<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            // the deferred free belongs to the last user out
            if token.leave() == 0 && self.pool.guard.is_locked() {
                self.pool.free_all();
                self.pool.guard.unlock();
            }
        }
    }
}

impl ScratchPool {
    /// Empty pool reporting to `host`.
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self { guard: UsageGuard::new(), buffers: Mutex::new(HashMap::new()), registered: AtomicUsize::new(0), host }
    }

    /// Buffer for the calling thread.
    ///
    /// While a reclaim is pending the lease gets a private buffer that is
    /// dropped with it, so the shared map is not touched.
    pub fn lease(&self) -> ScratchLease<'_> {
        match self.guard.enter() {
            Some(token) => {
                let buffer = lock(&self.buffers).entry(thread::current().id()).or_default().clone();
                ScratchLease { pool: self, token: Some(token), buffer }
            }
            None => ScratchLease { pool: self, token: None, buffer: ScratchBuffer::default() },
        }
    }

    /// Bytes currently registered with the host.
    pub fn registered_bytes(&self) -> usize {
        self.registered.load(Ordering::SeqCst)
    }

    /// Number of threads holding a buffer.
    pub fn thread_count(&self) -> usize {
        lock(&self.buffers).len()
    }

    /// Frees scratch now if unused, else defers the free to the last user.
    /// Returns the bytes freed immediately.
    pub fn reclaim(&self) -> usize {
        if !self.guard.lock() {
            return 0;
        }
        if self.guard.users() == 0 {
            let freed = self.free_all();
            self.guard.unlock();
            freed
        } else {
            debug!(users = self.guard.users(), "scratch in use, deferring free");
            0
        }
    }

    fn free_all(&self) -> usize {
        lock(&self.buffers).clear();
        let freed = self.registered.swap(0, Ordering::SeqCst);
        if freed > 0 {
            self.host.release_memory(SCRATCH_OWNER, freed);
        }
        freed
    }
}
