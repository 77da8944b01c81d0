//! Deflate compression for game snapshots.
//!
//! A snapshot of a running game is large and highly repetitive, so it is
//! deflated before it goes on the wire. Compression is CPU-bound; the
//! server runs it on the blocking pool, never on the event loop.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

use crate::ProtocolError;

/// Deflates `data` with a fast compression level.
pub fn compress_snapshot(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(data).map_err(ProtocolError::Compression)?;
    encoder.finish().map_err(ProtocolError::Compression)
}

/// Inflates data produced by [`compress_snapshot`].
pub fn decompress_snapshot(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut decoder = DeflateDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(ProtocolError::Compression)?;
    Ok(out)
}
