//! Content checksums (MD5, 16 bytes)

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::path::Path;

pub const CHECKSUM_LEN: usize = 16;

const READ_BUF: usize = 256 * 1024;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum(pub [u8; CHECKSUM_LEN]);

impl Checksum {
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(md5::compute(data).0)
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", self.to_hex())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Hash a reader to the end
pub fn checksum_reader<R: Read>(mut reader: R) -> std::io::Result<Checksum> {
    let mut ctx = md5::Context::new();
    let mut buf = vec![0u8; READ_BUF];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        ctx.consume(&buf[..n]);
    }
    Ok(Checksum(ctx.compute().0))
}

/// Hash the full content of a local file
pub fn file_checksum(path: &Path) -> SyncResult<Checksum> {
    let f = std::fs::File::open(path).map_err(|e| SyncError::local_io("checksum", path, e))?;
    checksum_reader(f).map_err(|e| SyncError::local_io("checksum", path, e))
}
