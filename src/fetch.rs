//! Chunked, compressed retrieval of one remote file

use crate::checksum::file_checksum;
use crate::error::{SyncError, SyncResult};
use crate::node::FileDesc;
use crate::protocol::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
use crate::remote::Remote;
use flate2::{Decompress, FlushDecompress, Status};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

// Decompressed bytes produced per inflate call
const INFLATE_BUF: usize = 64 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    /// Upper bound on compressed bytes requested per chunk
    pub chunk_size: u32,
    /// Re-hash the finished file and compare with the remote checksum
    pub verify: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            verify: true,
        }
    }
}

impl FetchOptions {
    pub fn effective_chunk_size(&self) -> u32 {
        self.chunk_size.clamp(1, MAX_CHUNK_SIZE)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FetchStats {
    pub chunks: u64,
    pub compressed_bytes: u64,
    pub bytes_written: u64,
}

/// Fetch `desc` into `dest`, replacing whatever file content was there.
///
/// Chunks are requested in order starting at compressed offset 0; each
/// non-empty chunk is fed through one zlib stream into the file and the
/// offset advances by the chunk's length. The first empty chunk ends the
/// transfer, and by then the zlib stream must have reached its end marker.
/// Bytes past the end marker are rejected. Errors are not retried. On failure
/// the partially written file is left behind, closed.
pub async fn fetch_file<R: Remote + ?Sized>(
    remote: &R,
    desc: &FileDesc,
    path: &str,
    dest: &Path,
    opts: FetchOptions,
) -> SyncResult<FetchStats> {
    let max = opts.effective_chunk_size();
    let file = File::create(dest).map_err(|e| SyncError::local_io("create file", dest, e))?;
    let mut out = BufWriter::new(file);
    let mut inflater = Inflater::new();
    let mut stats = FetchStats::default();
    let mut offset: u64 = 0;

    loop {
        let chunk = remote
            .get_chunk(&desc.file, offset, max)
            .await
            .map_err(|e| into_transfer_error(e, path, offset))?;
        if chunk.is_empty() {
            break;
        }
        if inflater.finished {
            return Err(bad_stream(path, offset, "data after end of compressed stream"));
        }
        stats.chunks += 1;
        inflater.feed(&chunk, &mut out, path, dest, offset)?;
        offset += chunk.len() as u64;
    }

    if !inflater.finished {
        return Err(bad_stream(path, offset, "compressed stream ended early"));
    }
    stats.compressed_bytes = offset;
    stats.bytes_written = inflater.state.total_out();
    out.flush()
        .map_err(|e| SyncError::local_io("write", dest, e))?;
    drop(out);

    if opts.verify {
        let got = file_checksum(dest)?;
        if got != desc.checksum {
            return Err(SyncError::TransferFailed {
                path: path.to_string(),
                offset,
                message: format!("checksum mismatch: expected {}, got {}", desc.checksum, got),
            });
        }
    }
    Ok(stats)
}

/// One zlib stream spread over any number of chunks
struct Inflater {
    state: Decompress,
    buf: Vec<u8>,
    finished: bool,
}

impl Inflater {
    fn new() -> Self {
        Self {
            state: Decompress::new(true),
            buf: vec![0u8; INFLATE_BUF],
            finished: false,
        }
    }

    /// Inflate all of `input` into `out`. `offset` is where `input` starts in
    /// the compressed stream.
    fn feed<W: Write>(
        &mut self,
        mut input: &[u8],
        out: &mut W,
        path: &str,
        dest: &Path,
        offset: u64,
    ) -> SyncResult<()> {
        let start_in = self.state.total_in();
        loop {
            let in_before = self.state.total_in();
            let out_before = self.state.total_out();
            let status = self
                .state
                .decompress(input, &mut self.buf, FlushDecompress::None)
                .map_err(|e| bad_stream(path, offset, &format!("bad compressed data: {}", e)))?;
            let consumed = (self.state.total_in() - in_before) as usize;
            let produced = (self.state.total_out() - out_before) as usize;
            out.write_all(&self.buf[..produced])
                .map_err(|e| SyncError::local_io("write", dest, e))?;
            input = &input[consumed..];

            match status {
                Status::StreamEnd => {
                    self.finished = true;
                    if !input.is_empty() {
                        return Err(bad_stream(
                            path,
                            offset + (self.state.total_in() - start_in),
                            "data after end of compressed stream",
                        ));
                    }
                    return Ok(());
                }
                // A full output buffer may hide more pending output even when
                // the input is used up.
                _ if input.is_empty() && produced < self.buf.len() => return Ok(()),
                _ if consumed == 0 && produced == 0 => {
                    return Err(bad_stream(path, offset, "compressed stream stalled"));
                }
                _ => {}
            }
        }
    }
}

fn bad_stream(path: &str, offset: u64, message: &str) -> SyncError {
    SyncError::TransferFailed {
        path: path.to_string(),
        offset,
        message: message.to_string(),
    }
}

fn into_transfer_error(err: SyncError, path: &str, offset: u64) -> SyncError {
    match err {
        SyncError::TransferFailed { .. } | SyncError::AccessDenied { .. } => err,
        other => SyncError::TransferFailed {
            path: path.to_string(),
            offset,
            message: other.to_string(),
        },
    }
}
