//! Response metadata handed from the upstream collaborator to the relay.
//!
//! # Responsibilities
//! - Hold status, version, headers, interim-status flags and buffered body
//! - Derive body framing from the headers on every read
//! - Reject structural mutation once the response is locked
//!
//! # Design Decisions
//! - Framing is never cached, so header edits and framing cannot disagree
//! - Public mutators fail with `ResponseLocked` after `lock()`
//! - A buffered body remembers whether it is still content-encoded

use std::fmt;

use bytes::Bytes;

use crate::http::headers::{HeaderList, CONTENT_ENCODING, CONTENT_LENGTH, TRANSFER_ENCODING};
use crate::relay::error::{RelayError, RelayResult};

/// HTTP protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpVersion {
    pub major: u8,
    pub minor: u8,
}

impl HttpVersion {
    pub const HTTP_10: HttpVersion = HttpVersion { major: 1, minor: 0 };
    pub const HTTP_11: HttpVersion = HttpVersion { major: 1, minor: 1 };

    pub fn is_http10(&self) -> bool {
        *self == Self::HTTP_10
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP/{}.{}", self.major, self.minor)
    }
}

/// How the response body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// `transfer-encoding: chunked`.
    Chunked,
    /// `content-length: N`.
    Length(u64),
    /// No framing header; HTTP/1.0 bodies run until close.
    Unknown,
}

/// Status line, headers and flags of an upstream response.
#[derive(Debug, Clone)]
pub struct ResponseMetadata {
    version: HttpVersion,
    status: u16,
    description: String,
    headers: HeaderList,
    is_100_continue: bool,
    expectation_failed: bool,
    body: Option<Bytes>,
    body_encoded: bool,
    locked: bool,
}

impl ResponseMetadata {
    pub fn new(version: HttpVersion, status: u16, description: impl Into<String>) -> Self {
        Self {
            version,
            status,
            description: description.into(),
            headers: HeaderList::new(),
            is_100_continue: false,
            expectation_failed: false,
            body: None,
            body_encoded: false,
            locked: false,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_headers(mut self, headers: HeaderList) -> Self {
        self.headers = headers;
        self
    }

    /// Attach a body the collaborator already read and decoded.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self.body_encoded = false;
        self
    }

    pub fn with_100_continue(mut self) -> Self {
        self.is_100_continue = true;
        self
    }

    pub fn with_expectation_failed(mut self) -> Self {
        self.expectation_failed = true;
        self
    }

    pub fn version(&self) -> HttpVersion {
        self.version
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn headers(&self) -> &HeaderList {
        &self.headers
    }

    pub fn is_100_continue(&self) -> bool {
        self.is_100_continue
    }

    pub fn expectation_failed(&self) -> bool {
        self.expectation_failed
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn is_body_buffered(&self) -> bool {
        self.body.is_some()
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// True when the buffered body still carries its content-encoding.
    pub fn is_body_encoded(&self) -> bool {
        self.body_encoded
    }

    /// Body framing derived from the current headers.
    pub fn framing(&self) -> BodyFraming {
        if self.is_chunked() {
            return BodyFraming::Chunked;
        }
        match self.content_length() {
            Some(length) => BodyFraming::Length(length),
            None => BodyFraming::Unknown,
        }
    }

    /// Whether the final transfer coding is `chunked`.
    pub fn is_chunked(&self) -> bool {
        self.headers
            .get_all(TRANSFER_ENCODING)
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .last()
            .is_some_and(|t| t.eq_ignore_ascii_case("chunked"))
    }

    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.trim().parse().ok())
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_ENCODING)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// 1xx, 204 and 304 responses never carry a body.
    pub fn may_have_body(&self) -> bool {
        !matches!(self.status, 100..=199 | 204 | 304)
    }

    pub fn set_status(&mut self, status: u16, description: impl Into<String>) -> RelayResult<()> {
        self.ensure_unlocked("change the status")?;
        self.status = status;
        self.description = description.into();
        Ok(())
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) -> RelayResult<()> {
        self.ensure_unlocked("set a header")?;
        self.headers.set(name, value);
        Ok(())
    }

    pub fn append_header(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> RelayResult<()> {
        self.ensure_unlocked("append a header")?;
        self.headers.append(name, value);
        Ok(())
    }

    pub fn remove_header(&mut self, name: &str) -> RelayResult<usize> {
        self.ensure_unlocked("remove a header")?;
        Ok(self.headers.remove(name))
    }

    /// Replace the body with plain content and keep `content-length` in step.
    pub fn set_body(&mut self, body: impl Into<Bytes>) -> RelayResult<()> {
        self.ensure_unlocked("replace the body")?;
        let body = body.into();
        self.sync_length(body.len());
        self.body = Some(body);
        self.body_encoded = false;
        Ok(())
    }

    /// Freeze the response. Idempotent.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    fn ensure_unlocked(&self, action: &'static str) -> RelayResult<()> {
        if self.locked {
            Err(RelayError::ResponseLocked(action))
        } else {
            Ok(())
        }
    }

    /// Drop `content-length` for chunked bodies, otherwise set it to `len`.
    pub(crate) fn sync_length(&mut self, len: usize) {
        if self.is_chunked() {
            self.headers.remove(CONTENT_LENGTH);
        } else {
            self.headers.set(CONTENT_LENGTH, len.to_string());
        }
    }

    pub(crate) fn headers_mut(&mut self) -> &mut HeaderList {
        &mut self.headers
    }

    pub(crate) fn store_body(&mut self, body: Bytes, encoded: bool) {
        self.body = Some(body);
        self.body_encoded = encoded;
    }

    pub(crate) fn mark_100_continue(&mut self) {
        self.is_100_continue = true;
    }

    pub(crate) fn mark_expectation_failed(&mut self) {
        self.expectation_failed = true;
    }
}
