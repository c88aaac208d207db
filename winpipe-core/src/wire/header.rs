//! Packet framing header.
//!
//! ```text
//! magic:        u8   'P'
//! flags:        u8   ProtocolFlags, must be empty
//! level:        u8   0 = plain, 1..=9 = zlib level, 0x10 = lz4 (rejected)
//! chunk index:  u8   0 = main packet, N > 0 = raw chunk for field N
//! payload size: u32  big-endian, excludes this header
//! ```

use bitflags::bitflags;

use crate::error::ProtocolError;

pub const MAGIC: u8 = b'P';
pub const HEADER_SIZE: usize = 8;

/// Compression level bit announcing an lz4 payload.
pub const LZ4_FLAG: u8 = 0x10;

bitflags! {
    /// Payload encoding flags. Only the empty set (plain bencode) is
    /// implemented; the others are recognised so they can be refused by name.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProtocolFlags: u8 {
        const RENCODE = 0x01;
        const CIPHER = 0x02;
        const NOHEADER = 0x40;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub flags: ProtocolFlags,
    /// zlib level of the payload, 0 when uncompressed.
    pub level: u8,
    pub chunk_index: u8,
    pub payload_size: u32,
}

impl PacketHeader {
    pub const fn main(level: u8, payload_size: u32) -> Self {
        Self {
            flags: ProtocolFlags::empty(),
            level,
            chunk_index: 0,
            payload_size,
        }
    }

    pub const fn chunk(index: u8, payload_size: u32) -> Self {
        Self {
            flags: ProtocolFlags::empty(),
            level: 0,
            chunk_index: index,
            payload_size,
        }
    }

    pub fn is_chunk(&self) -> bool {
        self.chunk_index > 0
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = MAGIC;
        buf[1] = self.flags.bits();
        buf[2] = self.level;
        buf[3] = self.chunk_index;
        buf[4..8].copy_from_slice(&self.payload_size.to_be_bytes());
        buf
    }

    /// Parse and validate a header. `max_size` bounds the payload.
    pub fn decode(buf: &[u8; HEADER_SIZE], max_size: usize) -> Result<Self, ProtocolError> {
        if buf[0] != MAGIC {
            return Err(ProtocolError::InvalidMagic(buf[0]));
        }
        if buf[1] != 0 {
            return Err(ProtocolError::UnsupportedFlags(buf[1]));
        }
        let level = buf[2];
        if level & LZ4_FLAG != 0 || level > 9 {
            return Err(ProtocolError::UnsupportedCompression(level));
        }
        let payload_size = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if payload_size as usize > max_size {
            return Err(ProtocolError::PacketTooLarge {
                size: payload_size as usize,
                max: max_size,
            });
        }
        Ok(Self {
            flags: ProtocolFlags::empty(),
            level,
            chunk_index: buf[3],
            payload_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_big_endian() {
        let h = PacketHeader::main(3, 0x0102_0304);
        assert_eq!(h.encode(), [b'P', 0, 3, 0, 1, 2, 3, 4]);
        assert_eq!(PacketHeader::decode(&h.encode(), usize::MAX).unwrap(), h);
    }

    #[test]
    fn rejects_unsupported_headers() {
        let ok = PacketHeader::chunk(6, 10).encode();

        let mut bad = ok;
        bad[0] = b'G';
        assert!(matches!(PacketHeader::decode(&bad, 100), Err(ProtocolError::InvalidMagic(b'G'))));

        let mut bad = ok;
        bad[1] = ProtocolFlags::RENCODE.bits();
        assert!(matches!(PacketHeader::decode(&bad, 100), Err(ProtocolError::UnsupportedFlags(1))));

        let mut bad = ok;
        bad[2] = LZ4_FLAG;
        assert!(matches!(
            PacketHeader::decode(&bad, 100),
            Err(ProtocolError::UnsupportedCompression(_))
        ));

        assert!(matches!(
            PacketHeader::decode(&ok, 9),
            Err(ProtocolError::PacketTooLarge { size: 10, max: 9 })
        ));
        assert!(PacketHeader::decode(&ok, 10).unwrap().is_chunk());
    }
}
