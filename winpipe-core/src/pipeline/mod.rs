//! The two ends of a window stream.
//!
//! [`WindowSource`] runs on the server: it captures a window, finds the
//! damaged areas, encodes them and sends `draw`s while the sequencer
//! allows. [`ClientWindows`] runs on the client: it puts `draw`s back in
//! order, decodes and paints them, and produces one ack per `draw`.

pub mod source;
pub mod surface;
pub mod window;

pub use source::{StreamConfig, WindowHandle, WindowSource, WindowStats};
pub use surface::Surface;
pub use window::{ClientWindow, ClientWindows};
