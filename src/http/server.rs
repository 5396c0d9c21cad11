//! Plain-HTTP forward proxy front end.
//!
//! # Responsibilities
//! - Accept client connections through the bounded `Listener`
//! - Parse the absolute-form request and open the upstream connection
//! - Forward the request head and body upstream
//! - Hand the response side to `ResponsePipeline` as a `Session`
//!
//! # Design Decisions
//! - One exchange per client connection; `Connection: close` is forced
//!   upstream
//! - `CONNECT` and origin-form targets are answered with `501`
//! - Graceful shutdown stops accepting, then drains in-flight exchanges

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use url::{Position, Url};

use crate::config::ProxyConfig;
use crate::http::head::{read_head, HeadError};
use crate::http::headers::{HeaderList, CONNECTION, CONTENT_LENGTH, PROXY_CONNECTION, TRANSFER_ENCODING};
use crate::net::listener::{Listener, ListenerError};
use crate::relay::chunked::relay_chunked;
use crate::relay::codec::CodecRegistry;
use crate::relay::error::RelayError;
use crate::relay::hooks::HookRegistry;
use crate::relay::pipeline::{RelayStats, ResponsePipeline};
use crate::relay::session::Session;

/// Most headers accepted in a single request head.
const MAX_REQUEST_HEADERS: usize = 128;

/// Why a single client exchange failed.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("client connection failed: {0}")]
    Client(#[source] io::Error),

    #[error("malformed request: {0}")]
    BadRequest(String),

    #[error("unsupported request: {0}")]
    Unsupported(String),

    #[error("upstream {authority} unreachable: {source}")]
    Connect {
        authority: String,
        #[source]
        source: io::Error,
    },

    #[error("upstream {0} did not accept within the connect timeout")]
    ConnectTimeout(String),

    #[error("upstream write failed: {0}")]
    Upstream(#[source] io::Error),

    #[error(transparent)]
    Relay(#[from] RelayError),
}

/// A parsed absolute-form proxy request.
#[derive(Debug, Clone)]
struct ForwardRequest {
    method: String,
    target: Url,
    minor_version: u8,
    headers: HeaderList,
}

impl ForwardRequest {
    /// `host:port` the upstream connection goes to.
    fn authority(&self) -> Option<String> {
        let host = self.target.host_str()?;
        let port = self.target.port_or_known_default()?;
        Some(format!("{host}:{port}"))
    }

    /// Request head as sent upstream: origin-form target, hop headers
    /// replaced by `Connection: close`.
    fn upstream_head(&self) -> String {
        let path = &self.target[Position::BeforePath..Position::AfterQuery];
        let path = if path.is_empty() { "/" } else { path };
        let mut head = format!("{} {} HTTP/1.{}\r\n", self.method, path, self.minor_version);

        if !self.headers.contains("host") {
            let host = &self.target[Position::BeforeHost..Position::AfterPort];
            head.push_str(&format!("Host: {host}\r\n"));
        }
        for header in &self.headers {
            if header.is(CONNECTION) || header.is(PROXY_CONNECTION) || header.is("keep-alive") {
                continue;
            }
            head.push_str(&header.to_string());
            head.push_str("\r\n");
        }
        head.push_str("Connection: close\r\n\r\n");
        head
    }
}

/// Forward proxy that relays every response through a `ResponsePipeline`.
pub struct ProxyServer {
    config: ProxyConfig,
    pipeline: Arc<ResponsePipeline>,
}

impl ProxyServer {
    /// Create a server running `hooks` on every response.
    pub fn new(config: ProxyConfig, hooks: HookRegistry) -> Self {
        let codecs = Arc::new(CodecRegistry::new(&config.compression));
        let pipeline = ResponsePipeline::new(Arc::new(hooks), codecs, &config.relay);
        Self {
            config,
            pipeline: Arc::new(pipeline),
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Serve until `shutdown` resolves, then wait for in-flight exchanges.
    pub async fn run<F>(self, listener: Listener, shutdown: F) -> Result<(), ListenerError>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            address = ?listener.local_addr().ok(),
            "Proxy server starting"
        );

        let connect_timeout = Duration::from_secs(self.config.upstream.connect_timeout_secs);
        let max_head_bytes = self.config.relay.max_head_bytes;
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = &mut shutdown => {
                    tracing::info!("Draining in-flight connections");
                    break;
                }
            };

            let (stream, peer, permit) = match accepted {
                Ok(accepted) => accepted,
                Err(ListenerError::Accept(e)) => {
                    tracing::warn!(error = %e, "Accept failed");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let pipeline = Arc::clone(&self.pipeline);
            tokio::spawn(async move {
                let _permit = permit;
                match handle_exchange(stream, &pipeline, connect_timeout, max_head_bytes).await {
                    Ok(stats) => tracing::debug!(
                        peer = %peer,
                        status = stats.status,
                        "Exchange complete"
                    ),
                    Err(e) => tracing::debug!(peer = %peer, error = %e, "Exchange failed"),
                }
            });
        }

        listener.drain().await;
        tracing::info!("Proxy server stopped");
        Ok(())
    }
}

/// Resolves on Ctrl+C. A failure to install the handler is logged and
/// treated as an immediate shutdown request.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
    }
    tracing::info!("Shutdown signal received");
}

async fn handle_exchange(
    stream: TcpStream,
    pipeline: &ResponsePipeline,
    connect_timeout: Duration,
    max_head_bytes: usize,
) -> Result<RelayStats, ExchangeError> {
    let (client_read, mut client_write) = stream.into_split();
    let mut client_read = BufReader::new(client_read);

    let request = match read_request(&mut client_read, max_head_bytes).await {
        Ok(request) => request,
        Err(e) => {
            let status = match e {
                ExchangeError::Unsupported(_) => "501 Not Implemented",
                _ => "400 Bad Request",
            };
            reject(&mut client_write, status).await;
            return Err(e);
        }
    };

    let authority = match request.authority() {
        Some(authority) => authority,
        None => {
            reject(&mut client_write, "400 Bad Request").await;
            return Err(ExchangeError::BadRequest("target has no host".into()));
        }
    };

    tracing::debug!(
        method = %request.method,
        target = %request.target,
        "Forwarding request"
    );

    let upstream = match tokio::time::timeout(connect_timeout, TcpStream::connect(&authority)).await {
        Ok(Ok(upstream)) => upstream,
        Ok(Err(source)) => {
            reject(&mut client_write, "502 Bad Gateway").await;
            return Err(ExchangeError::Connect { authority, source });
        }
        Err(_) => {
            reject(&mut client_write, "504 Gateway Timeout").await;
            return Err(ExchangeError::ConnectTimeout(authority));
        }
    };
    let (upstream_read, mut upstream_write) = upstream.into_split();

    upstream_write
        .write_all(request.upstream_head().as_bytes())
        .await
        .map_err(ExchangeError::Upstream)?;
    forward_body(&request, &mut client_read, &mut upstream_write, pipeline).await?;
    upstream_write.flush().await.map_err(ExchangeError::Upstream)?;

    let session = Session::new(client_write, upstream_read);
    Ok(pipeline.relay(session).await?)
}

async fn read_request<R>(reader: &mut R, max_head_bytes: usize) -> Result<ForwardRequest, ExchangeError>
where
    R: AsyncBufRead + Unpin,
{
    let head = read_head(reader, max_head_bytes).await.map_err(|e| match e {
        HeadError::TooLarge(max) => ExchangeError::BadRequest(format!("head exceeds {max} bytes")),
        HeadError::Eof => ExchangeError::Client(io::ErrorKind::UnexpectedEof.into()),
        HeadError::Io(e) => ExchangeError::Client(e),
    })?;

    let mut headers = [httparse::EMPTY_HEADER; MAX_REQUEST_HEADERS];
    let mut parsed = httparse::Request::new(&mut headers);
    match parsed.parse(&head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(ExchangeError::BadRequest("incomplete head".into()));
        }
        Err(e) => return Err(ExchangeError::BadRequest(e.to_string())),
    }

    let method = parsed.method.unwrap_or_default().to_string();
    if method.eq_ignore_ascii_case("CONNECT") {
        return Err(ExchangeError::Unsupported("CONNECT tunnels".into()));
    }

    let path = parsed.path.unwrap_or_default();
    let target = Url::parse(path)
        .map_err(|_| ExchangeError::Unsupported(format!("non-absolute target {path:?}")))?;
    if target.scheme() != "http" {
        return Err(ExchangeError::Unsupported(format!("scheme {}", target.scheme())));
    }

    let headers = parsed
        .headers
        .iter()
        .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
        .collect();

    Ok(ForwardRequest {
        method,
        target,
        minor_version: parsed.version.unwrap_or(1),
        headers,
    })
}

/// Copy the request body upstream, keeping its framing.
async fn forward_body<R, W>(
    request: &ForwardRequest,
    client: &mut R,
    upstream: &mut W,
    pipeline: &ResponsePipeline,
) -> Result<(), ExchangeError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let settings = pipeline.settings();
    let chunked = request
        .headers
        .get(TRANSFER_ENCODING)
        .and_then(|v| v.rsplit(',').next())
        .is_some_and(|last| last.trim().eq_ignore_ascii_case("chunked"));

    if chunked {
        relay_chunked(client, upstream, settings.chunk_limits).await?;
        return Ok(());
    }

    let length = match request.headers.get(CONTENT_LENGTH) {
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map_err(|_| ExchangeError::BadRequest(format!("content-length {value:?}")))?,
        None => 0,
    };
    if length > 0 {
        settings.copier.copy(client, upstream, Some(length)).await?;
    }
    Ok(())
}

/// Best-effort error response for exchanges that never reached upstream.
async fn reject<W>(client: &mut W, status: &str)
where
    W: AsyncWrite + Unpin,
{
    let response = format!("HTTP/1.1 {status}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
    if let Err(e) = client.write_all(response.as_bytes()).await {
        tracing::trace!(error = %e, "Could not send rejection");
    }
    let _ = client.shutdown().await;
}
