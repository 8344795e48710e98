//! Tokio transport for the treesync daemon and client.
//!
//! One TCP connection carries strictly sequential request/response pairs:
//! DESCRIBE_REQ -> DESCRIBE_RESP and CHUNK_REQ -> CHUNK_RESP, or ERROR.

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Duration};

use crate::protocol_core::{build_frame_header, parse_frame_header, validate_frame_size, HEADER_LEN};

pub async fn write_frame<S>(stream: &mut S, t: u8, payload: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    validate_frame_size(payload.len())?;
    let hdr = build_frame_header(t, payload.len() as u32);
    stream.write_all(&hdr).await?;
    if !payload.is_empty() {
        stream.write_all(payload).await?;
    }
    stream.flush().await?;
    Ok(())
}

/// Read one frame. `Ok(None)` means the peer closed the connection cleanly
/// between frames.
pub async fn read_frame<S>(stream: &mut S) -> Result<Option<(u8, Vec<u8>)>>
where
    S: AsyncRead + Unpin,
{
    let mut hdr = [0u8; HEADER_LEN];
    match stream.read_exact(&mut hdr).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let (typ, len) = parse_frame_header(&hdr)?;
    let len = len as usize;
    validate_frame_size(len)?;
    let mut payload = vec![0u8; len];
    if len > 0 {
        stream
            .read_exact(&mut payload)
            .await
            .context("connection closed mid-frame")?;
    }
    Ok(Some((typ, payload)))
}

pub async fn read_frame_timed<S>(stream: &mut S, ms: u64) -> Result<Option<(u8, Vec<u8>)>>
where
    S: AsyncRead + Unpin,
{
    match timeout(Duration::from_millis(ms), read_frame(stream)).await {
        Ok(res) => res,
        Err(_) => anyhow::bail!("frame read timeout ({} ms)", ms),
    }
}

pub mod server {
    use super::*;
    use crate::protocol::frame;
    use crate::protocol::timeouts::IDLE_MS;
    use crate::protocol_core::{decode_chunk_req, encode_error, encode_node};
    use crate::store::{StoreError, TreeStore};
    use std::path::Path;
    use std::sync::Arc;
    use tokio::net::{TcpListener, TcpStream};

    pub async fn serve(bind: &str, root: &Path) -> Result<()> {
        let listener = TcpListener::bind(bind)
            .await
            .with_context(|| format!("bind {}", bind))?;
        serve_listener(listener, root).await
    }

    /// Accept loop on an already bound listener
    pub async fn serve_listener(listener: TcpListener, root: &Path) -> Result<()> {
        let store = Arc::new(TreeStore::open(root)?);
        eprintln!(
            "treesync daemon listening on {} root={}",
            listener.local_addr()?,
            store.root().display()
        );
        loop {
            let (stream, peer) = listener.accept().await?;
            let _ = stream.set_nodelay(true);
            eprintln!("conn from {}", peer);
            let store = store.clone();
            tokio::spawn(async move {
                match handle_conn(stream, store).await {
                    Ok(requests) => eprintln!("conn {} closed after {} requests", peer, requests),
                    Err(e) => eprintln!("conn {} error: {:#}", peer, e),
                }
            });
        }
    }

    async fn handle_conn(mut stream: TcpStream, store: Arc<TreeStore>) -> Result<u64> {
        let mut requests = 0u64;
        while let Some((typ, pl)) = read_frame_timed(&mut stream, IDLE_MS).await? {
            requests += 1;
            match typ {
                frame::DESCRIBE_REQ => {
                    let identity = String::from_utf8_lossy(&pl).into_owned();
                    let st = store.clone();
                    let res = tokio::task::spawn_blocking(move || st.describe(&identity)).await?;
                    match res.and_then(|node| {
                        encode_node(&node).map_err(|e| StoreError::Internal(e.to_string()))
                    }) {
                        Ok(bytes) => write_frame(&mut stream, frame::DESCRIBE_RESP, &bytes).await?,
                        Err(e) => send_error(&mut stream, &e).await?,
                    }
                }
                frame::CHUNK_REQ => {
                    let (identity, offset, max) = match decode_chunk_req(&pl) {
                        Ok(v) => v,
                        Err(e) => {
                            send_error(&mut stream, &StoreError::BadRequest(e.to_string())).await?;
                            continue;
                        }
                    };
                    let st = store.clone();
                    let res =
                        tokio::task::spawn_blocking(move || st.get_chunk(&identity, offset, max)).await?;
                    match res {
                        Ok(bytes) => write_frame(&mut stream, frame::CHUNK_RESP, &bytes).await?,
                        Err(e) => send_error(&mut stream, &e).await?,
                    }
                }
                other => {
                    let e = StoreError::BadRequest(format!("unexpected frame type {}", other));
                    send_error(&mut stream, &e).await?;
                }
            }
        }
        Ok(requests)
    }

    async fn send_error(stream: &mut TcpStream, e: &StoreError) -> Result<()> {
        eprintln!("request failed: {}", e);
        write_frame(stream, frame::ERROR, &encode_error(e.code(), &e.to_string())).await
    }
}

pub mod client {
    use super::*;
    use crate::error::{SyncError, SyncResult};
    use crate::identity::{identity_to_path, identity_to_string, Identity};
    use crate::node::NodeDesc;
    use crate::protocol::timeouts::{request_deadline_ms, CONNECT_MS};
    use crate::protocol::{error_code, frame};
    use crate::protocol_core::{decode_error, decode_node, encode_chunk_req};
    use crate::remote::Remote;
    use async_trait::async_trait;
    use tokio::net::TcpStream;
    use tokio::sync::Mutex;

    pub async fn connect(endpoint: &str) -> Result<TcpStream> {
        let stream = match timeout(Duration::from_millis(CONNECT_MS), TcpStream::connect(endpoint)).await {
            Ok(res) => res.with_context(|| format!("connect {}", endpoint))?,
            Err(_) => anyhow::bail!("connect {} timed out ({} ms)", endpoint, CONNECT_MS),
        };
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }

    enum Reply {
        Ok(Vec<u8>),
        Refused { code: u8, message: String },
    }

    /// `Remote` backed by a treesync daemon
    pub struct TcpRemote {
        stream: Mutex<TcpStream>,
    }

    impl TcpRemote {
        pub async fn connect(endpoint: &str) -> SyncResult<Self> {
            let stream = connect(endpoint).await.map_err(|e| SyncError::Transport {
                path: crate::identity::ROOT_PATH.to_string(),
                message: format!("{:#}", e),
            })?;
            Ok(Self {
                stream: Mutex::new(stream),
            })
        }

        async fn request(&self, t: u8, payload: &[u8], expect: u8, reply_hint: usize) -> Result<Reply> {
            let mut stream = self.stream.lock().await;
            let ms = request_deadline_ms(payload.len().max(reply_hint));
            write_frame(&mut *stream, t, payload).await?;
            let (typ, pl) = read_frame_timed(&mut *stream, ms)
                .await?
                .ok_or_else(|| anyhow::anyhow!("daemon closed the connection"))?;
            if typ == expect {
                Ok(Reply::Ok(pl))
            } else if typ == frame::ERROR {
                let (code, message) = decode_error(&pl);
                Ok(Reply::Refused { code, message })
            } else {
                anyhow::bail!("unexpected frame type {} (expected {})", typ, expect)
            }
        }
    }

    fn display_path(identity: &Identity) -> String {
        identity_to_path(identity).unwrap_or_else(|_| identity.name.clone())
    }

    fn is_refusal(code: u8) -> bool {
        code == error_code::ACCESS_DENIED || code == error_code::NOT_FOUND
    }

    #[async_trait]
    impl Remote for TcpRemote {
        async fn describe(&self, identity: &Identity) -> SyncResult<NodeDesc> {
            let path = display_path(identity);
            let id = identity_to_string(identity);
            let reply = self
                .request(frame::DESCRIBE_REQ, id.as_bytes(), frame::DESCRIBE_RESP, 0)
                .await
                .map_err(|e| SyncError::Transport {
                    path: path.clone(),
                    message: format!("{:#}", e),
                })?;
            match reply {
                Reply::Ok(pl) => decode_node(&pl).map_err(|e| SyncError::protocol(format!("{:#}", e))),
                Reply::Refused { code, message } if is_refusal(code) => {
                    Err(SyncError::AccessDenied { path, reason: message })
                }
                Reply::Refused { message, .. } => Err(SyncError::Transport { path, message }),
            }
        }

        async fn get_chunk(&self, identity: &Identity, offset: u64, max: u32) -> SyncResult<Vec<u8>> {
            let path = display_path(identity);
            let id = identity_to_string(identity);
            let payload = encode_chunk_req(&id, offset, max);
            let failed = |message: String| SyncError::TransferFailed {
                path: path.clone(),
                offset,
                message,
            };
            let reply = self
                .request(frame::CHUNK_REQ, &payload, frame::CHUNK_RESP, max as usize)
                .await
                .map_err(|e| failed(format!("{:#}", e)))?;
            match reply {
                Reply::Ok(pl) if pl.len() > max as usize => {
                    Err(failed(format!("chunk of {} bytes exceeds requested {}", pl.len(), max)))
                }
                Reply::Ok(pl) => Ok(pl),
                Reply::Refused { code, message } if is_refusal(code) => Err(SyncError::AccessDenied {
                    path: path.clone(),
                    reason: message,
                }),
                Reply::Refused { message, .. } => Err(failed(message)),
            }
        }
    }
}
