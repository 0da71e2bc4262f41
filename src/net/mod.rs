//! Connection handling
//!
//! One listener per configured port, plain TCP or TLS. Each connection is
//! framed with a line codec capped at 10 KiB; oversized or non-JSON input
//! drops the socket. A miner poking a stratum port with a browser gets a
//! tiny plaintext HTTP response instead of silence.

pub mod protocol;

use crate::config::{PortConfig, TlsConfig};
use crate::error::{Error, Result};
use crate::net::protocol::RpcRequest;
use crate::pool::PoolServer;
use futures::StreamExt;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_rustls::rustls;
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

/// Longest accepted request line; anything larger is a flood.
const MAX_LINE_BYTES: usize = 10 * 1024;

/// Load certificate chain and key for a TLS port.
pub fn build_tls_acceptor(cfg: &TlsConfig) -> Result<TlsAcceptor> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(&cfg.cert)?))
        .collect::<std::io::Result<Vec<_>>>()?;
    if certs.is_empty() {
        return Err(Error::tls(format!(
            "no certificates found in {}",
            cfg.cert.display()
        )));
    }
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(&cfg.key)?))?
        .ok_or_else(|| Error::tls(format!("no private key found in {}", cfg.key.display())))?;
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| Error::tls(err.to_string()))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Bind a stratum port. Kept separate from the accept loop so an occupied
/// port fails startup instead of dying inside a spawned task.
pub async fn bind_listener(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    Ok(TcpListener::bind(addr).await?)
}

/// Accept loop for one configured port.
pub async fn run_listener(
    pool: Arc<PoolServer>,
    listener: TcpListener,
    port: PortConfig,
    tls: Option<TlsAcceptor>,
) -> Result<()> {
    info!(
        port = port.port,
        difficulty = port.difficulty,
        tls = tls.is_some(),
        "listening for miners"
    );

    loop {
        let (stream, peer) = listener.accept().await?;
        let ip = peer.ip();
        let pool = pool.clone();
        let difficulty = port.difficulty;
        match tls.clone() {
            Some(acceptor) => {
                tokio::spawn(async move {
                    match acceptor.accept(stream).await {
                        Ok(stream) => serve_connection(pool, stream, ip, difficulty).await,
                        Err(err) => debug!(%ip, %err, "tls handshake failed"),
                    }
                });
            }
            None => {
                tokio::spawn(serve_connection(pool, stream, ip, difficulty));
            }
        }
    }
}

/// Drive one miner connection until it closes or misbehaves.
async fn serve_connection<S>(pool: Arc<PoolServer>, stream: S, ip: std::net::IpAddr, difficulty: u64)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut frames = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    debug!(%ip, "connection opened");

    loop {
        tokio::select! {
            frame = frames.next() => {
                match frame {
                    Some(Ok(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<RpcRequest>(&line) {
                            Ok(request) => {
                                if let Some(reply) = pool.dispatch(ip, difficulty, request, &tx) {
                                    if write_half.write_all(reply.as_bytes()).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(_) if line.starts_with("GET ") => {
                                let _ = write_half.write_all(http_probe_reply(&line).as_bytes()).await;
                                break;
                            }
                            Err(err) => {
                                warn!(%ip, %err, "malformed message, dropping connection");
                                break;
                            }
                        }
                    }
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        warn!(%ip, "excessive packet size, dropping connection");
                        break;
                    }
                    Some(Err(err)) => {
                        debug!(%ip, %err, "socket read error");
                        break;
                    }
                    None => break,
                }
            }
            push = rx.recv() => {
                match push {
                    Some(line) => {
                        if write_half.write_all(line.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
    debug!(%ip, "connection closed");
}

/// Plaintext health reply for HTTP probes hitting a stratum port.
fn http_probe_reply(request_line: &str) -> String {
    let version = if request_line.contains("HTTP/1.0") {
        "HTTP/1.0"
    } else {
        "HTTP/1.1"
    };
    let body = "mining server online";
    format!(
        "{version} 200 OK\nContent-Type: text/plain\nContent-Length: {}\n\n{body}",
        body.len()
    )
}
