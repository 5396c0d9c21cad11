//! Buffering a live response body for hooks.

use bytes::Bytes;

use crate::http::response::BodyFraming;
use crate::relay::chunked::read_chunked;
use crate::relay::codec::{CodecRegistry, Decoded};
use crate::relay::error::{RelayError, RelayResult};
use crate::relay::pipeline::RelaySettings;
use crate::relay::session::Session;

/// Read the body off the upstream connection if it is not buffered yet,
/// decode its content-encoding, and store it on the response.
pub(crate) async fn buffer_body(
    session: &mut Session,
    codecs: &CodecRegistry,
    settings: &RelaySettings,
) -> RelayResult<Bytes> {
    let response = session.response_or_err()?;
    if let Some(body) = response.body() {
        return Ok(body.clone());
    }
    if response.is_locked() {
        return Err(RelayError::ResponseLocked("buffer the body"));
    }

    let framing = response.framing();
    let http10 = response.version().is_http10();
    let may_have_body = response.may_have_body();

    let upstream = session.upstream_mut()?;
    let raw = match framing {
        _ if !may_have_body => Vec::new(),
        BodyFraming::Chunked => read_chunked(upstream, settings.chunk_limits).await?,
        BodyFraming::Length(length) => {
            let mut raw = Vec::with_capacity(length.min(settings.copier.buffer_size() as u64) as usize);
            settings.copier.copy(upstream, &mut raw, Some(length)).await?;
            raw
        }
        BodyFraming::Unknown if http10 => {
            let mut raw = Vec::new();
            settings.copier.copy(upstream, &mut raw, None).await?;
            raw
        }
        BodyFraming::Unknown => Vec::new(),
    };
    let raw = Bytes::from(raw);

    let session_id = session.id();
    let response = session.response_or_err()?;
    let (body, encoded) = match response.content_encoding() {
        Some(token) => match codecs.decompress(token, raw) {
            Decoded::Plain(body) => (body, false),
            Decoded::Passthrough(body) => (body, true),
        },
        None => (raw, false),
    };

    tracing::debug!(
        session_id = %session_id,
        bytes = body.len(),
        still_encoded = encoded,
        "Response body buffered"
    );
    response.store_body(body.clone(), encoded);
    Ok(body)
}
