//! Frame and payload codecs shared by the client and the daemon

use anyhow::{bail, Context, Result};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{ErrorKind, Read, Write};

use crate::node::NodeDesc;

pub const HEADER_LEN: usize = 11;

/// Validate frame payload size using protocol::MAX_FRAME_SIZE directly
pub fn validate_frame_size(size: usize) -> Result<()> {
    if size > crate::protocol::MAX_FRAME_SIZE {
        bail!(
            "frame payload too large: {} bytes (max: {})",
            size,
            crate::protocol::MAX_FRAME_SIZE
        );
    }
    Ok(())
}

/// Build frame header (11 bytes)
/// Format: MAGIC (4) | VERSION (2) | TYPE (1) | LENGTH (4)
pub fn build_frame_header(frame_type: u8, payload_len: u32) -> [u8; HEADER_LEN] {
    use crate::protocol::{MAGIC, VERSION};

    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(MAGIC);
    header[4..6].copy_from_slice(&VERSION.to_le_bytes());
    header[6] = frame_type;
    header[7..11].copy_from_slice(&payload_len.to_le_bytes());
    header
}

/// Parse frame header
/// Returns: (frame_type, payload_length)
pub fn parse_frame_header(header: &[u8; HEADER_LEN]) -> Result<(u8, u32)> {
    use crate::protocol::{MAGIC, VERSION};

    if &header[0..4] != MAGIC {
        bail!("invalid magic in frame header");
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != VERSION {
        bail!("protocol version mismatch: got {}, expected {}", version, VERSION);
    }
    let frame_type = header[6];
    let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]);
    Ok((frame_type, payload_len))
}

/// CHUNK_REQ payload: offset u64 | max u32 | identity
pub fn encode_chunk_req(identity: &str, offset: u64, max: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(12 + identity.len());
    out.extend_from_slice(&offset.to_le_bytes());
    out.extend_from_slice(&max.to_le_bytes());
    out.extend_from_slice(identity.as_bytes());
    out
}

pub fn decode_chunk_req(payload: &[u8]) -> Result<(String, u64, u32)> {
    if payload.len() < 12 {
        bail!("bad CHUNK_REQ payload");
    }
    let offset = u64::from_le_bytes(payload[0..8].try_into().context("bad CHUNK_REQ offset")?);
    let max = u32::from_le_bytes(payload[8..12].try_into().context("bad CHUNK_REQ max")?);
    let identity = std::str::from_utf8(&payload[12..]).context("CHUNK_REQ identity not utf-8")?;
    Ok((identity.to_string(), offset, max))
}

/// ERROR payload: code u8 | message
pub fn encode_error(code: u8, message: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + message.len());
    out.push(code);
    out.extend_from_slice(message.as_bytes());
    out
}

pub fn decode_error(payload: &[u8]) -> (u8, String) {
    match payload.split_first() {
        Some((code, msg)) => (*code, String::from_utf8_lossy(msg).into_owned()),
        None => (0, String::new()),
    }
}

pub fn encode_node(node: &NodeDesc) -> Result<Vec<u8>> {
    bincode::serialize(node).context("encode node description")
}

pub fn decode_node(payload: &[u8]) -> Result<NodeDesc> {
    bincode::deserialize(payload).context("decode node description")
}

/// zlib-compress a whole file body; chunks are slices of this stream
pub fn compress_content(data: &[u8]) -> Result<Vec<u8>> {
    let out = Vec::with_capacity(data.len() / 2 + 64);
    let (_, compressed) = compress_stream(data, out, |_| {})?;
    Ok(compressed)
}

/// zlib-compress everything `reader` yields into `out` as one stream.
/// `inspect` sees each block of plain bytes as it passes. Returns the plain
/// length and the writer.
pub fn compress_stream<R, W>(
    mut reader: R,
    out: W,
    mut inspect: impl FnMut(&[u8]),
) -> std::io::Result<(u64, W)>
where
    R: Read,
    W: Write,
{
    let mut enc = ZlibEncoder::new(out, Compression::default());
    let mut buf = vec![0u8; 256 * 1024];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        inspect(&buf[..n]);
        enc.write_all(&buf[..n])?;
        total += n as u64;
    }
    Ok((total, enc.finish()?))
}
