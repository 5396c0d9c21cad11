//! Per-exchange session.
//!
//! # Responsibilities
//! - Own the client writer, upstream reader and response metadata
//! - Track the relay state for diagnostics
//! - Release every resource exactly once, on success or failure
//!
//! # Design Decisions
//! - Streams are boxed trait objects so hooks see one concrete `Session`
//! - `release` and `abort` are idempotent; `Drop` releases as a last resort
//! - Abort drops the client writer without flushing buffered bytes

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter};

use crate::http::response::ResponseMetadata;
use crate::relay::error::{RelayError, RelayResult};

/// Downstream client byte sink.
pub type ClientStream = Box<dyn AsyncWrite + Unpin + Send>;

/// Upstream server byte source.
pub type UpstreamStream = Box<dyn AsyncRead + Unpin + Send>;

/// Only uniqueness matters, so relaxed ordering is enough.
static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new() -> Self {
        Self(SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Where a response is in the relay pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    AwaitMetadata,
    InvokeHooks,
    Locked,
    EmitInterimStatus,
    EmitStatusLine,
    EmitHeaders,
    EmitBody,
    Flush,
    Done,
    Aborted,
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelayState::AwaitMetadata => "await_metadata",
            RelayState::InvokeHooks => "invoke_hooks",
            RelayState::Locked => "locked",
            RelayState::EmitInterimStatus => "emit_interim_status",
            RelayState::EmitStatusLine => "emit_status_line",
            RelayState::EmitHeaders => "emit_headers",
            RelayState::EmitBody => "emit_body",
            RelayState::Flush => "flush",
            RelayState::Done => "done",
            RelayState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// One in-flight response exchange.
pub struct Session {
    id: SessionId,
    client: Option<BufWriter<ClientStream>>,
    upstream: Option<BufReader<UpstreamStream>>,
    response: Option<ResponseMetadata>,
    state: RelayState,
}

impl Session {
    /// Create a session over the client sink and upstream source.
    pub fn new<C, U>(client: C, upstream: U) -> Self
    where
        C: AsyncWrite + Unpin + Send + 'static,
        U: AsyncRead + Unpin + Send + 'static,
    {
        Self {
            id: SessionId::new(),
            client: Some(BufWriter::new(Box::new(client) as ClientStream)),
            upstream: Some(BufReader::new(Box::new(upstream) as UpstreamStream)),
            response: None,
            state: RelayState::AwaitMetadata,
        }
    }

    /// Attach metadata the upstream collaborator already received.
    pub fn with_response(mut self, response: ResponseMetadata) -> Self {
        self.response = Some(response);
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn response(&self) -> Option<&ResponseMetadata> {
        self.response.as_ref()
    }

    pub fn response_mut(&mut self) -> Option<&mut ResponseMetadata> {
        self.response.as_mut()
    }

    /// True once the streams have been released or aborted.
    pub fn is_released(&self) -> bool {
        self.client.is_none() && self.upstream.is_none()
    }

    /// Release all resources after a completed relay. Safe to call twice.
    pub fn release(&mut self) {
        if self.is_released() {
            return;
        }
        self.client = None;
        self.upstream = None;
        self.response = None;
        tracing::trace!(session_id = %self.id, state = %self.state, "Session released");
    }

    /// Force-close the connections without flushing. Safe to call twice.
    pub fn abort(&mut self) {
        if self.is_released() {
            return;
        }
        self.state = RelayState::Aborted;
        // BufWriter drops without flushing, so no partial frame goes out
        self.client = None;
        self.upstream = None;
        self.response = None;
        tracing::trace!(session_id = %self.id, "Session aborted");
    }

    pub(crate) fn set_state(&mut self, state: RelayState) {
        tracing::trace!(session_id = %self.id, state = %state, "Relay state");
        self.state = state;
    }

    pub(crate) fn set_response(&mut self, response: ResponseMetadata) {
        self.response = Some(response);
    }

    pub(crate) fn response_or_err(&mut self) -> RelayResult<&mut ResponseMetadata> {
        self.response.as_mut().ok_or(RelayError::SessionReleased)
    }

    pub(crate) fn upstream_mut(&mut self) -> RelayResult<&mut BufReader<UpstreamStream>> {
        self.upstream.as_mut().ok_or(RelayError::SessionReleased)
    }

    pub(crate) fn client_mut(&mut self) -> RelayResult<&mut BufWriter<ClientStream>> {
        self.client.as_mut().ok_or(RelayError::SessionReleased)
    }

    /// Both streams at once, for relaying a live body.
    pub(crate) fn io_mut(
        &mut self,
    ) -> RelayResult<(&mut BufReader<UpstreamStream>, &mut BufWriter<ClientStream>)> {
        match (self.upstream.as_mut(), self.client.as_mut()) {
            (Some(upstream), Some(client)) => Ok((upstream, client)),
            _ => Err(RelayError::SessionReleased),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("released", &self.is_released())
            .field("response", &self.response)
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[tokio::test]
    async fn release_twice_is_noop() {
        let (client, mut peer) = tokio::io::duplex(64);
        let mut session = Session::new(client, tokio::io::empty());

        session.release();
        session.release();
        session.abort();
        assert!(session.is_released());
        assert_eq!(session.state(), RelayState::AwaitMetadata);
        assert!(matches!(session.client_mut(), Err(RelayError::SessionReleased)));

        let mut buf = Vec::new();
        assert_eq!(peer.read_to_end(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn abort_discards_buffered_bytes() {
        use tokio::io::AsyncWriteExt;

        let (client, mut peer) = tokio::io::duplex(64);
        let mut session = Session::new(client, tokio::io::empty());
        session.client_mut().unwrap().write_all(b"partial").await.unwrap();
        session.abort();

        assert_eq!(session.state(), RelayState::Aborted);
        let mut buf = Vec::new();
        peer.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn drop_closes_client() {
        let (client, mut peer) = tokio::io::duplex(64);
        drop(Session::new(client, tokio::io::empty()));
        let mut buf = Vec::new();
        assert_eq!(peer.read_to_end(&mut buf).await.unwrap(), 0);
    }
}
