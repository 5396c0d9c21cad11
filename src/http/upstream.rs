//! Upstream response head reader.
//!
//! # Responsibilities
//! - Read a response head off the upstream connection
//! - Parse it into `ResponseMetadata` with `httparse`
//! - Fold interim `100 Continue` / `417 Expectation Failed` heads into flags
//!
//! # Design Decisions
//! - Reads through the same buffered reader the body is later relayed from,
//!   so no upstream byte is lost between head and body
//! - Head size is bounded before parsing

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::http::head::{read_head, HeadError};
use crate::http::headers::HeaderList;
use crate::http::response::{HttpVersion, ResponseMetadata};
use crate::relay::error::{RelayError, RelayResult};

/// Most headers accepted in a single response head.
const MAX_HEADERS: usize = 128;

/// Read the next final response head from `reader`.
pub async fn receive_response<R>(reader: &mut R, max_head_bytes: usize) -> RelayResult<ResponseMetadata>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut continued = false;
    let mut expectation_failed = false;

    loop {
        let head = read_head(reader, max_head_bytes).await.map_err(|e| match e {
            HeadError::TooLarge(max) => {
                RelayError::MalformedResponse(format!("head exceeds {max} bytes"))
            }
            HeadError::Eof => RelayError::unexpected_eof("response head"),
            HeadError::Io(e) => RelayError::upstream(e),
        })?;
        let response = parse_head(&head)?;

        let interim = match response.status() {
            100 => {
                tracing::trace!("Upstream sent 100 Continue");
                continued = true;
                true
            }
            417 => {
                let interim = is_interim_417(&response, reader).await?;
                if interim {
                    tracing::trace!("Upstream sent interim 417 Expectation Failed");
                    expectation_failed = true;
                }
                interim
            }
            _ => false,
        };

        if !interim {
            let mut response = response;
            if continued {
                response.mark_100_continue();
            }
            if expectation_failed {
                response.mark_expectation_failed();
            }
            return Ok(response);
        }
    }
}

/// A 417 without framing headers that is immediately followed by another
/// status line is an interim head.
async fn is_interim_417<R>(response: &ResponseMetadata, reader: &mut R) -> RelayResult<bool>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    if response.is_chunked() || response.content_length().is_some() {
        return Ok(false);
    }
    let next = reader.fill_buf().await.map_err(RelayError::upstream)?;
    Ok(next.starts_with(b"HTTP/"))
}

/// Parse a complete head into metadata.
pub fn parse_head(head: &[u8]) -> RelayResult<ResponseMetadata> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut headers);

    match parsed.parse(head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(RelayError::MalformedResponse("incomplete head".into()));
        }
        Err(e) => return Err(RelayError::MalformedResponse(e.to_string())),
    }

    let version = HttpVersion {
        major: 1,
        minor: parsed.version.unwrap_or(1),
    };
    let status = parsed
        .code
        .ok_or_else(|| RelayError::MalformedResponse("missing status code".into()))?;
    let description = parsed.reason.unwrap_or_default().to_string();

    let headers: HeaderList = parsed
        .headers
        .iter()
        .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
        .collect();

    Ok(ResponseMetadata::new(version, status, description).with_headers(headers))
}
