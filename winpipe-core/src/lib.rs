//! # winpipe-core
//!
//! Picture pipeline and wire protocol for remote window streaming.
//!
//! This crate contains:
//! - **Pixels**: `PixelBuffer`, `PixelFormat`, `Rect` and the dual-release handle
//! - **Colorspace**: `ColorspaceConverter` and the format dispatch table
//! - **Codecs**: raw, png and the `yuvz` video encoder/decoder state machines
//! - **Capture**: `CaptureSource` with synthetic, shadow and Y4M sources
//! - **Damage**: `DamageDetector` for tile-level change detection
//! - **Wire**: bencoded packets and `PacketCodec` for framed TCP I/O
//! - **Sequencer**: per-window sequence numbers, backpressure and resequencing
//! - **Pipeline**: the per-window server worker and the client paint path
//! - **Error**: `PipelineError` and `ProtocolError`, `thiserror`-based

pub mod capture;
pub mod codec;
pub mod csc;
pub mod damage;
pub mod error;
pub mod network;
pub mod pipeline;
pub mod pixel;
pub mod sequencer;
pub mod wire;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use capture::{CaptureSource, ShadowFramebuffer, ShadowSource, SourceSpec, SyntheticSource, Y4mSource};
pub use codec::{EncodedPicture, Encoding, EncoderSettings, PictureDecoder, PictureEncoder, VideoDecoder, VideoEncoder};
pub use csc::ColorspaceConverter;
pub use damage::{Damage, DamageDetector};
pub use error::{PipelineError, ProtocolError};
pub use network::{Connection, ConnectionInfo, ConnectionSender};
pub use pipeline::{ClientWindow, ClientWindows, StreamConfig, Surface, WindowHandle, WindowSource, WindowStats};
pub use pixel::{PixelBuffer, PixelFormat, Rect};
pub use sequencer::{AckObserver, AdaptiveTuner, Resequencer, WindowSequencer};
pub use wire::{AckPacket, Capabilities, DrawPacket, NewWindowPacket, Packet, PacketCodec, WindowId};

/// Protocol version announced in `hello`.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");
