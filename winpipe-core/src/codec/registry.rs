//! Registry of live codec contexts keyed by stable integer handles.
//!
//! Release callbacks that outlive a context (decoded frames still held
//! by the application) find their owner through the registry instead of
//! holding a pointer to it. Once the context is gone the lookup misses and
//! the callback does nothing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, RwLock};

/// Concurrent handle → value table.
#[derive(Debug)]
pub struct HandleRegistry<T> {
    next: AtomicU64,
    entries: RwLock<HashMap<u64, Arc<T>>>,
}

impl<T> HandleRegistry<T> {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Store `value` under a fresh handle. Handles are never reused.
    pub fn register(&self, value: Arc<T>) -> u64 {
        let handle = self.next.fetch_add(1, Ordering::Relaxed);
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(handle, value);
        handle
    }

    pub fn get(&self, handle: u64) -> Option<Arc<T>> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&handle)
            .cloned()
    }

    pub fn remove(&self, handle: u64) -> Option<Arc<T>> {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for HandleRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ── Codec contexts ───────────────────────────────────────────────

/// What kind of codec owns a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    Encoder,
    Decoder,
}

/// Counters shared between a context and its outstanding frames.
#[derive(Debug)]
pub struct ContextStats {
    pub kind: ContextKind,
    /// Decoded frames not yet released by both sides.
    pub live_frames: AtomicUsize,
    /// Frames produced over the lifetime of the context.
    pub frames: AtomicU64,
}

impl ContextStats {
    fn new(kind: ContextKind) -> Self {
        Self {
            kind,
            live_frames: AtomicUsize::new(0),
            frames: AtomicU64::new(0),
        }
    }
}

/// Process-wide table of live codec contexts.
pub static CONTEXTS: LazyLock<HandleRegistry<ContextStats>> = LazyLock::new(HandleRegistry::new);

/// Registration of one codec context; unregisters on drop.
#[derive(Debug)]
pub struct ContextHandle {
    handle: u64,
    stats: Arc<ContextStats>,
}

impl ContextHandle {
    pub fn register(kind: ContextKind) -> Self {
        let stats = Arc::new(ContextStats::new(kind));
        let handle = CONTEXTS.register(Arc::clone(&stats));
        Self { handle, stats }
    }

    pub fn id(&self) -> u64 {
        self.handle
    }

    pub fn stats(&self) -> &ContextStats {
        &self.stats
    }
}

impl Drop for ContextHandle {
    fn drop(&mut self) {
        CONTEXTS.remove(self.handle);
    }
}
