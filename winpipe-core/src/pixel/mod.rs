//! Pixel data carriers shared by every pipeline stage.

pub mod buffer;
pub mod format;
pub mod release;

// ── Re-exports ───────────────────────────────────────────────────

pub use buffer::{PixelBuffer, Rect, SharedPlanes};
pub use format::{ALL_FORMATS, ChannelLayout, PixelFormat, align4};
pub use release::{ReleaseHandle, Side, dual_release, dual_release_with};
