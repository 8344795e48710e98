//! Shared protocol constants for the treesync framed transport

// Protocol header constants
pub const MAGIC: &[u8; 4] = b"TSYN";
pub const VERSION: u16 = 1;

// Maximum frame payload size (16MB) - bounds memory per request
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

// Compressed bytes requested per chunk unless configured otherwise
pub const DEFAULT_CHUNK_SIZE: u32 = 256 * 1024;

// Largest chunk a client may ask for; must fit in one frame
pub const MAX_CHUNK_SIZE: u32 = 8 * 1024 * 1024;

pub const DEFAULT_PORT: u16 = 9032;

// Frame type IDs
pub mod frame {
    pub const DESCRIBE_REQ: u8 = 1;
    pub const DESCRIBE_RESP: u8 = 2;
    // CHUNK_REQ payload: offset u64 | max u32 | identity bytes
    pub const CHUNK_REQ: u8 = 3;
    // CHUNK_RESP payload: compressed bytes, empty at end of content
    pub const CHUNK_RESP: u8 = 4;
    // ERROR payload: code u8 | utf-8 message
    pub const ERROR: u8 = 5;
}

pub mod error_code {
    pub const ACCESS_DENIED: u8 = 1;
    pub const NOT_FOUND: u8 = 2;
    pub const BAD_REQUEST: u8 = 3;
    pub const INTERNAL: u8 = 4;
}

// Centralized timeout constants
pub mod timeouts {
    // Connection establishment timeout (ms)
    pub const CONNECT_MS: u64 = 5_000;

    // Base timeout for a request/response round trip (ms)
    pub const REQUEST_BASE_MS: u64 = 30_000;

    // Additional timeout per MB of payload (ms)
    pub const PER_MB_MS: u64 = 1_000;

    // How long the daemon waits for the next request on an idle connection (ms)
    pub const IDLE_MS: u64 = 300_000;

    // Round trip deadline: base + 1s per MB of payload (ceil)
    pub fn request_deadline_ms(payload_len: usize) -> u64 {
        let mb = (payload_len as u64 + 1_048_575) / 1_048_576;
        REQUEST_BASE_MS + mb * PER_MB_MS
    }
}
