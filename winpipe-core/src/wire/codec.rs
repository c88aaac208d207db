//! Framed packet codec for `tokio_util::codec::Framed`.
//!
//! Large byte-string fields are split out of the main packet and sent
//! ahead of it as raw chunks (`chunk index = field index`), so pixel data
//! is never bencoded. The receiver holds raw chunks until the main packet
//! arrives and then puts each one back into its field.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{trace, warn};

use crate::codec::zlib;
use crate::error::ProtocolError;
use crate::wire::header::{HEADER_SIZE, PacketHeader};
use crate::wire::packet::Packet;
use crate::wire::value::Value;

/// Default bound on a main packet's payload.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 32 * 1024;
/// Default bound on a raw chunk's payload.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;
/// Byte-string fields at least this large travel as raw chunks.
pub const CHUNK_THRESHOLD: usize = 4096;
/// Raw chunks that may wait for their main packet.
pub const MAX_PENDING_CHUNKS: usize = 3;
/// Main packets shorter than this are never compressed.
const MIN_COMPRESS_SIZE: usize = 512;

#[derive(Debug)]
pub struct PacketCodec {
    max_packet_size: usize,
    max_chunk_size: usize,
    compression_level: u8,
    pending: BTreeMap<u8, Vec<u8>>,
}

impl PacketCodec {
    pub fn new() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            compression_level: 0,
            pending: BTreeMap::new(),
        }
    }

    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// zlib level for outgoing main packets, 0 to disable.
    pub fn with_compression(mut self, level: u8) -> Self {
        self.compression_level = level.min(9);
        self
    }

    /// Raise the main packet limit, e.g. after the peer's `hello`.
    pub fn set_max_packet_size(&mut self, size: usize) {
        self.max_packet_size = size;
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    fn inflate(&self, header: &PacketHeader, payload: &[u8], limit: usize) -> Result<Vec<u8>, ProtocolError> {
        if header.level == 0 {
            return Ok(payload.to_vec());
        }
        zlib::decompress(payload, limit).map_err(|e| ProtocolError::Decompress(e.to_string()))
    }

    /// Decode a main packet and put the pending raw chunks back into it.
    ///
    /// Chunks must sit where [`Encoder::encode`] would have put them: a
    /// large byte string in an empty byte-string slot. A large byte string
    /// sent inline is refused for the same reason.
    fn assemble(&mut self, data: &[u8]) -> Result<Packet, ProtocolError> {
        let mut value = Value::decode(data)?;
        let chunks = std::mem::take(&mut self.pending);
        let Value::List(items) = &mut value else {
            return Err(ProtocolError::NotAPacket);
        };
        for (index, item) in items.iter().enumerate().skip(1).take(u8::MAX as usize) {
            if matches!(item, Value::Bytes(b) if b.len() >= CHUNK_THRESHOLD) {
                return Err(ProtocolError::ChunkLayout {
                    index: index as u8,
                    reason: "large byte string sent inline",
                });
            }
        }
        for (index, chunk) in chunks {
            let fields = items.len();
            let slot = items
                .get_mut(index as usize)
                .ok_or(ProtocolError::ChunkOutOfRange { index, fields })?;
            if chunk.len() < CHUNK_THRESHOLD {
                return Err(ProtocolError::ChunkLayout {
                    index,
                    reason: "chunk below the chunk threshold",
                });
            }
            if !matches!(slot, Value::Bytes(b) if b.is_empty()) {
                return Err(ProtocolError::ChunkLayout {
                    index,
                    reason: "field is not an empty byte string",
                });
            }
            *slot = Value::Bytes(chunk);
        }
        Packet::from_value(value)
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.len() < HEADER_SIZE {
                return Ok(None);
            }
            let mut head = [0u8; HEADER_SIZE];
            head.copy_from_slice(&src[..HEADER_SIZE]);
            let limit = if head[3] > 0 {
                self.max_chunk_size
            } else {
                self.max_packet_size
            };
            let header = PacketHeader::decode(&head, limit)?;

            let total = HEADER_SIZE + header.payload_size as usize;
            if src.len() < total {
                src.reserve(total - src.len());
                return Ok(None);
            }
            src.advance(HEADER_SIZE);
            let payload = src.split_to(header.payload_size as usize);
            let data = self.inflate(&header, &payload, limit)?;

            if header.is_chunk() {
                if header.level > 0 {
                    return Err(ProtocolError::ChunkLayout {
                        index: header.chunk_index,
                        reason: "raw chunks are never compressed",
                    });
                }
                if self.pending.last_key_value().is_some_and(|(last, _)| *last >= header.chunk_index) {
                    return Err(ProtocolError::ChunkLayout {
                        index: header.chunk_index,
                        reason: "chunks out of field order",
                    });
                }
                trace!(index = header.chunk_index, bytes = data.len(), "raw chunk received");
                self.pending.insert(header.chunk_index, data);
                if self.pending.len() > MAX_PENDING_CHUNKS {
                    return Err(ProtocolError::TooManyChunks(self.pending.len()));
                }
                continue;
            }
            return self.assemble(&data).map(Some);
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let packet_type = packet.packet_type();
        let mut value = packet.into_value();

        if let Value::List(items) = &mut value {
            for (index, item) in items.iter_mut().enumerate().skip(1).take(u8::MAX as usize) {
                let large = matches!(item, Value::Bytes(b) if b.len() >= CHUNK_THRESHOLD);
                if !large {
                    continue;
                }
                let Value::Bytes(chunk) = std::mem::replace(item, Value::Bytes(Vec::new())) else {
                    continue;
                };
                let size = u32::try_from(chunk.len()).map_err(|_| ProtocolError::PacketTooLarge {
                    size: chunk.len(),
                    max: u32::MAX as usize,
                })?;
                dst.reserve(HEADER_SIZE + chunk.len());
                dst.put_slice(&PacketHeader::chunk(index as u8, size).encode());
                dst.put_slice(&chunk);
            }
        }

        let mut payload = value.to_bytes();
        let mut level = 0;
        if self.compression_level > 0 && payload.len() >= MIN_COMPRESS_SIZE {
            payload = zlib::compress(&payload, self.compression_level)?;
            level = self.compression_level;
        }
        if payload.len() > self.max_packet_size {
            warn!(packet_type, bytes = payload.len(), "outgoing packet exceeds the peer limit");
        }
        let size = u32::try_from(payload.len()).map_err(|_| ProtocolError::PacketTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        })?;
        dst.reserve(HEADER_SIZE + payload.len());
        dst.put_slice(&PacketHeader::main(level, size).encode());
        dst.put_slice(&payload);
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
