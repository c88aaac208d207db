//! Flow control between the two ends of a window stream.
//!
//! The sender numbers each `draw` and withholds new ones while too many
//! are unacknowledged; the receiver puts `draw`s back in order before
//! they are painted and acknowledged.

pub mod batch;
pub mod latency;
pub mod receiver;
pub mod sender;
pub mod tuner;

pub use batch::{BatchDelay, BatchInputs};
pub use latency::LatencyTracker;
pub use receiver::{Push, Resequencer};
pub use sender::{Acknowledged, DEFAULT_MAX_UNACKED, PendingDraw, WindowSequencer};
pub use tuner::{AckObserver, AdaptiveTuner};
