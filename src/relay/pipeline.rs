//! Response relay pipeline.
//!
//! # Responsibilities
//! - Obtain response metadata from the upstream connection
//! - Run response hooks behind a fan-in barrier, then lock the response
//! - Emit interim status, status line, headers and body in that order
//! - Tear the session down on any failure
//!
//! # State Machine
//! ```text
//! AwaitMetadata → InvokeHooks → Locked → [EmitInterimStatus] → EmitStatusLine
//!     → EmitHeaders → EmitBody → Flush → Done
//!
//! any state ──error──▶ Aborted (streams dropped unflushed)
//! ```
//!
//! # Design Decisions
//! - Buffered bodies are re-encoded before the first byte is written, so an
//!   unsatisfiable content-encoding never leaves a half-written response
//! - No synthetic error response after a failure; the wire may already hold
//!   a partial frame

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures_util::future::join_all;
use futures_util::FutureExt;
use tokio::io::AsyncWriteExt;

use crate::config::RelayConfig;
use crate::http::response::{BodyFraming, ResponseMetadata};
use crate::http::upstream::receive_response;
use crate::observability::metrics;
use crate::relay::chunked::{relay_chunked, write_single_chunk, ChunkLimits};
use crate::relay::codec::CodecRegistry;
use crate::relay::copier::StreamCopier;
use crate::relay::error::{RelayError, RelayResult};
use crate::relay::hooks::{HookContext, HookRegistry};
use crate::relay::session::{RelayState, Session};

/// Tunables shared by every relay run.
#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    pub copier: StreamCopier,
    pub chunk_limits: ChunkLimits,
    pub max_head_bytes: usize,
}

impl From<&RelayConfig> for RelaySettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            copier: StreamCopier::new(config.buffer_size),
            chunk_limits: ChunkLimits::from(config),
            max_head_bytes: config.max_head_bytes,
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

/// Summary of a completed relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    /// Final status code sent to the client.
    pub status: u16,
    /// Body bytes written, excluding chunk framing.
    pub body_bytes: u64,
}

/// Re-serializes upstream responses onto client connections.
#[derive(Debug, Clone)]
pub struct ResponsePipeline {
    hooks: Arc<HookRegistry>,
    codecs: Arc<CodecRegistry>,
    settings: RelaySettings,
}

impl ResponsePipeline {
    pub fn new(hooks: Arc<HookRegistry>, codecs: Arc<CodecRegistry>, config: &RelayConfig) -> Self {
        Self {
            hooks,
            codecs,
            settings: RelaySettings::from(config),
        }
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// Relay one response. The session is always released on return.
    pub async fn relay(&self, mut session: Session) -> RelayResult<RelayStats> {
        let started = Instant::now();
        let result = self.drive(&mut session).await;

        match &result {
            Ok(stats) => {
                session.set_state(RelayState::Done);
                tracing::debug!(
                    session_id = %session.id(),
                    status = stats.status,
                    body_bytes = stats.body_bytes,
                    "Response relayed"
                );
                metrics::record_relay(stats.status, stats.body_bytes, started);
                session.release();
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %session.id(),
                    state = %session.state(),
                    kind = e.kind(),
                    error = %e,
                    "Relay aborted"
                );
                metrics::record_abort(e.kind(), started);
                session.abort();
            }
        }

        result
    }

    async fn drive(&self, session: &mut Session) -> RelayResult<RelayStats> {
        session.set_state(RelayState::AwaitMetadata);
        if session.response().is_none() {
            let upstream = session.upstream_mut()?;
            let response = receive_response(upstream, self.settings.max_head_bytes).await?;
            session.set_response(response);
        }

        if !self.hooks.is_empty() && !session.response_or_err()?.is_locked() {
            session.set_state(RelayState::InvokeHooks);
            self.invoke_hooks(session).await?;
        }

        session.set_state(RelayState::Locked);
        let response = session.response_or_err()?;
        response.lock();
        let buffered = self.prepare_buffered_body(response)?;
        response.headers_mut().fix_proxy_headers();
        let head = ResponseHead::from(&*response);

        if let Some(interim) = head.interim.as_deref() {
            session.set_state(RelayState::EmitInterimStatus);
            write_text(session, interim).await?;
        }

        session.set_state(RelayState::EmitStatusLine);
        write_text(session, &head.status_line).await?;

        session.set_state(RelayState::EmitHeaders);
        write_text(session, &head.header_block).await?;
        session
            .client_mut()?
            .flush()
            .await
            .map_err(RelayError::downstream)?;

        session.set_state(RelayState::EmitBody);
        let body_bytes = match buffered {
            Some(body) => self.emit_buffered(session, &body, &head).await?,
            None => self.emit_streamed(session, &head).await?,
        };

        session.set_state(RelayState::Flush);
        session
            .client_mut()?
            .flush()
            .await
            .map_err(RelayError::downstream)?;

        Ok(RelayStats {
            status: head.status,
            body_bytes,
        })
    }

    /// Run every hook concurrently and wait for all of them.
    async fn invoke_hooks(&self, session: &mut Session) -> RelayResult<()> {
        let session_id = session.id();
        let cx = HookContext::new(session, &self.codecs, &self.settings);

        // The call itself sits inside the guarded future so a hook that
        // panics before returning its future is caught as well.
        let cx = &cx;
        let outcomes = join_all(self.hooks.iter().map(|hook| {
            AssertUnwindSafe(async move { hook.on_response(cx).await }).catch_unwind()
        }))
        .await;

        let mut first_failure = None;
        for (hook, outcome) in self.hooks.iter().zip(outcomes) {
            let reason = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
            };
            tracing::warn!(
                session_id = %session_id,
                hook = hook.name(),
                reason = %reason,
                "Response hook failed"
            );
            metrics::record_hook_failure(hook.name());
            first_failure.get_or_insert(RelayError::HookFailure {
                hook: hook.name().to_string(),
                reason,
            });
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Re-encode a decoded buffered body and bring `content-length` in line.
    fn prepare_buffered_body(&self, response: &mut ResponseMetadata) -> RelayResult<Option<Bytes>> {
        let Some(body) = response.body().cloned() else {
            return Ok(None);
        };
        if response.is_body_encoded() {
            return Ok(Some(body));
        }
        let Some(token) = response.content_encoding().map(str::to_owned) else {
            return Ok(Some(body));
        };

        let encoded = self.codecs.compress(&token, &body)?;
        response.sync_length(encoded.len());
        response.store_body(encoded.clone(), true);
        Ok(Some(encoded))
    }

    async fn emit_buffered(
        &self,
        session: &mut Session,
        body: &[u8],
        head: &ResponseHead,
    ) -> RelayResult<u64> {
        if !head.may_have_body {
            return Ok(0);
        }
        let client = session.client_mut()?;
        if head.framing == BodyFraming::Chunked {
            write_single_chunk(client, body).await?;
        } else {
            client.write_all(body).await.map_err(RelayError::downstream)?;
        }
        Ok(body.len() as u64)
    }

    async fn emit_streamed(&self, session: &mut Session, head: &ResponseHead) -> RelayResult<u64> {
        if !head.may_have_body {
            return Ok(0);
        }
        let (upstream, client) = session.io_mut()?;
        match head.framing {
            BodyFraming::Chunked => relay_chunked(upstream, client, self.settings.chunk_limits).await,
            BodyFraming::Length(0) => Ok(0),
            BodyFraming::Length(length) => self.settings.copier.copy(upstream, client, Some(length)).await,
            BodyFraming::Unknown if head.http10 => self.settings.copier.copy(upstream, client, None).await,
            BodyFraming::Unknown => Ok(0),
        }
    }
}

/// Serialized head of a locked response.
struct ResponseHead {
    interim: Option<String>,
    status_line: String,
    header_block: String,
    status: u16,
    framing: BodyFraming,
    http10: bool,
    may_have_body: bool,
}

impl From<&ResponseMetadata> for ResponseHead {
    fn from(response: &ResponseMetadata) -> Self {
        let version = response.version();
        let interim = if response.is_100_continue() {
            Some(format!("{version} 100 Continue\r\n\r\n"))
        } else if response.expectation_failed() {
            Some(format!("{version} 417 Expectation Failed\r\n\r\n"))
        } else {
            None
        };

        let mut header_block = String::new();
        for header in response.headers() {
            header_block.push_str(&header.to_string());
            header_block.push_str("\r\n");
        }
        header_block.push_str("\r\n");

        Self {
            interim,
            status_line: format!(
                "{version} {} {}\r\n",
                response.status(),
                response.description()
            ),
            header_block,
            status: response.status(),
            framing: response.framing(),
            http10: version.is_http10(),
            may_have_body: response.may_have_body(),
        }
    }
}

async fn write_text(session: &mut Session, text: &str) -> RelayResult<()> {
    session
        .client_mut()?
        .write_all(text.as_bytes())
        .await
        .map_err(RelayError::downstream)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
