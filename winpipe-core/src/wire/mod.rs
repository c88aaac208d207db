//! Wire protocol: framing header, bencoded values, typed packets and the
//! `Framed` codec tying them together.

pub mod codec;
pub mod header;
pub mod packet;
pub mod value;

// ── Re-exports ───────────────────────────────────────────────────

pub use codec::{DEFAULT_MAX_PACKET_SIZE, PacketCodec};
pub use header::{HEADER_SIZE, PacketHeader, ProtocolFlags};
pub use packet::{
    AckPacket, Capabilities, DECODE_FAILED, DrawPacket, NewWindowPacket, Options, Packet, WindowId,
};
pub use value::Value;
