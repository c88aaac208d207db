//! Error types for the picture pipeline and the wire protocol.
//!
//! Pipeline stages return `Result<T, PipelineError>`. Protocol, I/O and
//! closed-channel errors end the connection; every other variant affects
//! a single frame or a single codec context and is handled at the stream
//! boundary by dropping that frame.

use std::time::Duration;
use thiserror::Error;

use crate::pixel::PixelFormat;

/// The canonical error type for pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Picture Errors ───────────────────────────────────────────
    /// A pixel format, encoding or codec combination is not supported.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A pixel buffer is malformed for the requested operation.
    #[error("invalid buffer: {0}")]
    InvalidBuffer(String),

    /// A colorspace transform failed part-way through.
    #[error("conversion {from:?} -> {to:?} failed: {reason}")]
    ConversionFailed {
        from: PixelFormat,
        to: PixelFormat,
        reason: String,
    },

    // ── Codec Errors ─────────────────────────────────────────────
    /// The encoder could not produce a bitstream for this frame.
    #[error("encode failed: {0}")]
    EncodeFailed(String),

    /// The decoder could not reconstruct this frame.
    #[error("decode failed: {0}")]
    DecodeFailed(String),

    /// An operation was attempted in the wrong lifecycle state.
    #[error("invalid state: cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    // ── Connection Errors ────────────────────────────────────────
    /// The peer sent bytes that violate the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Capture Errors ───────────────────────────────────────────
    /// The capture source could not produce a frame.
    #[error("capture failed: {0}")]
    Capture(String),

    /// The capture source has no more frames. Ends the window stream.
    #[error("capture source ended")]
    SourceEnded,
}

impl PipelineError {
    /// Whether this error must terminate the connection.
    ///
    /// Per-frame failures are recoverable: the frame is dropped and the
    /// stream continues.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::Protocol(_) | PipelineError::Connection(_) | PipelineError::ChannelClosed
        )
    }
}

// ── ProtocolError ─────────────────────────────────────────────────

/// Wire-level failures. Any of these means the byte stream can no
/// longer be trusted and the connection is closed.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// First header byte was not `'P'`.
    #[error("invalid packet header: first byte {0:#04x} is not 'P' (gibberish)")]
    InvalidMagic(u8),

    /// Header carried protocol flags this peer does not implement.
    #[error("unsupported protocol flags: {0:#04x}")]
    UnsupportedFlags(u8),

    /// Header carried a compression scheme this peer does not implement.
    #[error("unsupported compression level byte: {0:#04x}")]
    UnsupportedCompression(u8),

    /// Declared payload exceeds the configured maximum.
    #[error("packet too large: {size} bytes (max {max})")]
    PacketTooLarge { size: usize, max: usize },

    /// Too many raw chunks were queued before the main packet arrived.
    #[error("too many pending raw chunks: {0}")]
    TooManyChunks(usize),

    /// A raw chunk referenced a field that the main packet does not have.
    #[error("raw chunk index {index} out of range for packet with {fields} fields")]
    ChunkOutOfRange { index: u8, fields: usize },

    /// A compressed payload could not be inflated.
    #[error("decompression failed: {0}")]
    Decompress(String),

    /// The payload was not canonical bencode.
    #[error("malformed value at offset {offset}: {reason}")]
    Malformed { offset: usize, reason: &'static str },

    /// The decoded value was not a list headed by a packet type string.
    #[error("packet is not a list headed by a type string")]
    NotAPacket,

    /// The packet type is not known to this peer.
    #[error("unknown packet type: {0:?}")]
    UnknownPacketType(String),

    /// A mandatory field is absent.
    #[error("{packet}: missing field {index}")]
    MissingField { packet: &'static str, index: usize },

    /// A packet carried more fields than its type defines.
    #[error("{packet}: {fields} fields, at most {max} allowed")]
    TrailingFields {
        packet: &'static str,
        fields: usize,
        max: usize,
    },

    /// A raw chunk does not sit where the encoder would have put it.
    #[error("raw chunk {index}: {reason}")]
    ChunkLayout { index: u8, reason: &'static str },

    /// A field has the wrong value type.
    #[error("{packet}: field {index} should be {expected}")]
    FieldType {
        packet: &'static str,
        index: usize,
        expected: &'static str,
    },

    /// The transport failed while reading or writing frames.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

// ── Convenient From implementations ──────────────────────────────

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for PipelineError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        PipelineError::ChannelClosed
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(e: tokio::task::JoinError) -> Self {
        PipelineError::Capture(format!("worker task failed: {e}"))
    }
}
