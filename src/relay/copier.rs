//! Bounded stream copier.
//!
//! # Responsibilities
//! - Forward a length-delimited body without reading past its end
//! - Forward an HTTP/1.0 close-delimited body until upstream EOF
//!
//! # Design Decisions
//! - One fixed-size buffer per copy; memory does not grow with body size
//! - Each read is written and flushed before the next read
//! - Upstream EOF before the declared length is a transfer error

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::relay::error::{RelayError, RelayResult};

/// Default intermediate buffer size.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Copies a body from upstream to downstream through a fixed buffer.
#[derive(Debug, Clone, Copy)]
pub struct StreamCopier {
    buffer_size: usize,
}

impl StreamCopier {
    /// Create a copier. A zero buffer size is bumped to one byte.
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Copy `length` bytes, or everything until EOF when `length` is `None`.
    ///
    /// Returns the number of bytes forwarded.
    pub async fn copy<R, W>(&self, src: &mut R, dst: &mut W, length: Option<u64>) -> RelayResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut buffer = vec![0u8; self.buffer_size];
        let mut total = 0u64;

        loop {
            let want = match length {
                Some(length) => {
                    let remaining = length - total;
                    if remaining == 0 {
                        break;
                    }
                    remaining.min(self.buffer_size as u64) as usize
                }
                None => self.buffer_size,
            };

            let read = src
                .read(&mut buffer[..want])
                .await
                .map_err(RelayError::upstream)?;

            if read == 0 {
                if length.is_some() {
                    return Err(RelayError::unexpected_eof("end of body"));
                }
                break;
            }

            dst.write_all(&buffer[..read])
                .await
                .map_err(RelayError::downstream)?;
            dst.flush().await.map_err(RelayError::downstream)?;
            total += read as u64;
        }

        tracing::trace!(bytes = total, bounded = length.is_some(), "Stream copy finished");
        Ok(total)
    }
}

impl Default for StreamCopier {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}
