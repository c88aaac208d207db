//! zlib helpers shared by raw pixel encodings and packet compression.

use std::io::{self, Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

/// Compress `data` at `level` (1..=9).
pub fn compress(data: &[u8], level: u8) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(
        Vec::with_capacity(data.len() / 2),
        Compression::new(level.clamp(1, 9).into()),
    );
    encoder.write_all(data)?;
    encoder.finish()
}

/// Inflate `data`, refusing to produce more than `limit` bytes.
pub fn decompress(data: &[u8], limit: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(data)
        .take(limit as u64 + 1)
        .read_to_end(&mut out)?;
    if out.len() > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("inflates beyond {limit} bytes"),
        ));
    }
    Ok(out)
}
