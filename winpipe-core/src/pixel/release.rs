//! Two-sided release join for memory shared between a codec and the
//! application.
//!
//! A decoder hands frames to the application while still keeping them as
//! prediction references. Neither side may free the memory on its own:
//! each side holds a [`ReleaseHandle`], and the free callback runs exactly
//! once, when the second of the two handles is released. The join is a
//! single atomic two-bit flag word, so the outcome does not depend on
//! which thread releases first.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

const CODEC_RELEASED: u8 = 0b01;
const APP_RELEASED: u8 = 0b10;
const BOTH_RELEASED: u8 = CODEC_RELEASED | APP_RELEASED;

type FreeCallback<T> = Box<dyn FnOnce(&T) + Send>;

/// Which party a [`ReleaseHandle`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Codec,
    App,
}

impl Side {
    const fn bit(self) -> u8 {
        match self {
            Side::Codec => CODEC_RELEASED,
            Side::App => APP_RELEASED,
        }
    }
}

struct Shared<T> {
    value: T,
    state: AtomicU8,
    on_free: Mutex<Option<FreeCallback<T>>>,
}

/// One side's claim on a dual-released value.
///
/// Dropping the handle releases it.
pub struct ReleaseHandle<T> {
    shared: Arc<Shared<T>>,
    side: Side,
    released: bool,
}

/// Split `value` into a codec-side and an application-side handle.
pub fn dual_release<T>(value: T) -> (ReleaseHandle<T>, ReleaseHandle<T>) {
    build(value, None)
}

/// Like [`dual_release`], running `on_free` once both sides have released.
pub fn dual_release_with<T, F>(value: T, on_free: F) -> (ReleaseHandle<T>, ReleaseHandle<T>)
where
    F: FnOnce(&T) + Send + 'static,
{
    build(value, Some(Box::new(on_free)))
}

fn build<T>(value: T, on_free: Option<FreeCallback<T>>) -> (ReleaseHandle<T>, ReleaseHandle<T>) {
    let shared = Arc::new(Shared {
        value,
        state: AtomicU8::new(0),
        on_free: Mutex::new(on_free),
    });
    (
        ReleaseHandle {
            shared: Arc::clone(&shared),
            side: Side::Codec,
            released: false,
        },
        ReleaseHandle {
            shared,
            side: Side::App,
            released: false,
        },
    )
}

impl<T> ReleaseHandle<T> {
    /// Borrow the shared value. Valid for as long as this handle lives.
    pub fn get(&self) -> &T {
        &self.shared.value
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Whether the opposite side has already let go.
    pub fn peer_released(&self) -> bool {
        let peer = BOTH_RELEASED & !self.side.bit();
        self.shared.state.load(Ordering::Acquire) & peer != 0
    }

    /// Release this side's claim.
    ///
    /// Returns `true` when this call completed the join and ran the free
    /// callback.
    pub fn release(mut self) -> bool {
        self.release_inner()
    }

    fn release_inner(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;

        let bit = self.side.bit();
        let previous = self.shared.state.fetch_or(bit, Ordering::AcqRel);
        if previous | bit != BOTH_RELEASED {
            return false;
        }

        let callback = self
            .shared
            .on_free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(callback) = callback {
            callback(&self.shared.value);
        }
        true
    }
}

impl<T> Drop for ReleaseHandle<T> {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl<T> fmt::Debug for ReleaseHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseHandle")
            .field("side", &self.side)
            .field("state", &self.shared.state.load(Ordering::Relaxed))
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────
