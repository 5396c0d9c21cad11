//! Shared utilities for integration testing.

use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use response_relay::config::RelayConfig;
use response_relay::relay::pipeline::RelayStats;
use response_relay::relay::{CodecRegistry, HookRegistry, RelayResult, ResponsePipeline, Session};

/// Pipeline with default settings running `hooks`.
#[allow(dead_code)]
pub fn pipeline(hooks: HookRegistry) -> ResponsePipeline {
    ResponsePipeline::new(
        Arc::new(hooks),
        Arc::new(CodecRegistry::default()),
        &RelayConfig::default(),
    )
}

/// Session reading `upstream` and writing into a duplex pipe, plus a task
/// collecting everything the client side receives.
#[allow(dead_code)]
pub fn session(upstream: impl Into<Vec<u8>>) -> (Session, tokio::task::JoinHandle<Vec<u8>>) {
    let (client, mut peer) = tokio::io::duplex(64 * 1024);
    let received = tokio::spawn(async move {
        let mut out = Vec::new();
        let _ = peer.read_to_end(&mut out).await;
        out
    });
    (Session::new(client, Cursor::new(upstream.into())), received)
}

/// Relay `session` and return the outcome with the bytes the client saw.
#[allow(dead_code)]
pub async fn relay_session(
    pipeline: &ResponsePipeline,
    session: Session,
    received: tokio::task::JoinHandle<Vec<u8>>,
) -> (RelayResult<RelayStats>, Vec<u8>) {
    let result = pipeline.relay(session).await;
    let out = received.await.unwrap();
    (result, out)
}

/// Relay a raw upstream byte stream with no pre-parsed metadata.
#[allow(dead_code)]
pub async fn relay_bytes(
    pipeline: &ResponsePipeline,
    upstream: impl Into<Vec<u8>>,
) -> (RelayResult<RelayStats>, Vec<u8>) {
    let (session, received) = session(upstream);
    relay_session(pipeline, session, received).await
}

/// Start a mock upstream that answers every connection with `response`
/// and reports each request head it received.
#[allow(dead_code)]
pub async fn start_mock_upstream(response: &'static [u8]) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let (read, mut write) = socket.into_split();
                let mut read = BufReader::new(read);
                let mut head = String::new();
                loop {
                    let mut line = String::new();
                    match read.read_line(&mut line).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                    head.push_str(&line);
                    if line == "\r\n" {
                        break;
                    }
                }
                let length = head
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                let mut body = vec![0u8; length];
                let _ = read.read_exact(&mut body).await;
                let _ = tx.send(head);
                let _ = write.write_all(response).await;
                let _ = write.shutdown().await;
            });
        }
    });

    (addr, rx)
}

/// Split raw response bytes at the end of the head.
#[allow(dead_code)]
pub fn split_head(raw: &[u8]) -> (String, Vec<u8>) {
    let end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| p + 4)
        .unwrap_or(raw.len());
    (String::from_utf8_lossy(&raw[..end]).into_owned(), raw[end..].to_vec())
}
