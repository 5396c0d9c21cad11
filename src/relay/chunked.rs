//! Chunked transfer codec.
//!
//! # Responsibilities
//! - Frame a buffered body as a single chunk plus terminator
//! - Re-frame a live chunked upstream body chunk by chunk
//! - Decode a live chunked body into memory for hooks
//!
//! # Design Decisions
//! - Outgoing chunk headers are computed from the bytes actually read,
//!   never echoed from upstream
//! - Chunk boundaries are preserved in arrival order, nothing is coalesced
//! - Chunk extensions and trailers are consumed and dropped

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::RelayConfig;
use crate::relay::error::{RelayError, RelayResult};

/// Line terminator used on the wire.
pub const CRLF: &[u8] = b"\r\n";

/// Zero-length chunk plus the empty trailer section.
pub const CHUNK_END: &[u8] = b"0\r\n\r\n";

/// Bounds applied while parsing upstream chunked framing.
#[derive(Debug, Clone, Copy)]
pub struct ChunkLimits {
    /// Largest single chunk the relay will hold in memory.
    pub max_chunk_size: u64,
    /// Longest chunk-size or trailer line accepted.
    pub max_line_bytes: usize,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

impl From<&RelayConfig> for ChunkLimits {
    fn from(config: &RelayConfig) -> Self {
        Self {
            max_chunk_size: config.max_chunk_size,
            max_line_bytes: config.max_line_bytes,
        }
    }
}

/// Chunk header for a payload of `len` bytes: lowercase hex, no padding.
pub fn chunk_header(len: usize) -> String {
    format!("{len:x}\r\n")
}

/// Write `data` as one chunk followed by the terminating chunk.
///
/// An empty buffer produces only the terminator.
pub async fn write_single_chunk<W>(out: &mut W, data: &[u8]) -> RelayResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if !data.is_empty() {
        write_chunk(out, data).await?;
    }
    out.write_all(CHUNK_END).await.map_err(RelayError::downstream)
}

async fn write_chunk<W>(out: &mut W, data: &[u8]) -> RelayResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    out.write_all(chunk_header(data.len()).as_bytes())
        .await
        .map_err(RelayError::downstream)?;
    out.write_all(data).await.map_err(RelayError::downstream)?;
    out.write_all(CRLF).await.map_err(RelayError::downstream)
}

/// Relay a chunked upstream body to `out`, re-framing every chunk.
///
/// Returns the number of payload bytes relayed.
pub async fn relay_chunked<R, W>(src: &mut R, out: &mut W, limits: ChunkLimits) -> RelayResult<u64>
where
    R: AsyncBufRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut reader = ChunkReader::new(src, limits);
    let mut total = 0u64;

    while let Some(data) = reader.next_chunk().await? {
        tracing::trace!(chunk_len = data.len(), "Relaying chunk");
        write_chunk(out, &data).await?;
        // Each chunk reaches the client before the next one is read.
        out.flush().await.map_err(RelayError::downstream)?;
        total += data.len() as u64;
    }

    out.write_all(CHUNK_END).await.map_err(RelayError::downstream)?;
    Ok(total)
}

/// Read a whole chunked body into memory, dropping the framing.
pub async fn read_chunked<R>(src: &mut R, limits: ChunkLimits) -> RelayResult<Vec<u8>>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut reader = ChunkReader::new(src, limits);
    let mut body = Vec::new();
    while let Some(data) = reader.next_chunk().await? {
        body.extend_from_slice(&data);
    }
    Ok(body)
}

/// Pull parser over an upstream chunked body.
pub struct ChunkReader<'a, R: ?Sized> {
    src: &'a mut R,
    limits: ChunkLimits,
    done: bool,
}

impl<'a, R> ChunkReader<'a, R>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    pub fn new(src: &'a mut R, limits: ChunkLimits) -> Self {
        Self {
            src,
            limits,
            done: false,
        }
    }

    /// Next chunk payload, or `None` once the zero-length chunk and its
    /// trailers have been consumed.
    pub async fn next_chunk(&mut self) -> RelayResult<Option<Vec<u8>>> {
        if self.done {
            return Ok(None);
        }

        let line = self
            .read_line()
            .await?
            .ok_or_else(|| RelayError::unexpected_eof("chunk size line"))?;
        let size = parse_chunk_size(&line)?;

        if size == 0 {
            self.consume_trailers().await?;
            self.done = true;
            return Ok(None);
        }

        if size > self.limits.max_chunk_size {
            return Err(RelayError::ChunkTooLarge {
                size,
                limit: self.limits.max_chunk_size,
            });
        }

        let mut data = vec![0u8; size as usize];
        self.src
            .read_exact(&mut data)
            .await
            .map_err(RelayError::upstream)?;

        // CRLF closing the chunk data
        if self.read_line().await?.is_none() {
            return Err(RelayError::unexpected_eof("chunk terminator"));
        }

        Ok(Some(data))
    }

    async fn consume_trailers(&mut self) -> RelayResult<()> {
        while let Some(line) = self.read_line().await? {
            if trim_line_end(&line).is_empty() {
                break;
            }
            tracing::trace!(trailer = %String::from_utf8_lossy(trim_line_end(&line)), "Dropping trailer");
        }
        Ok(())
    }

    /// Read one `\n`-terminated line, `None` at EOF.
    async fn read_line(&mut self) -> RelayResult<Option<Vec<u8>>> {
        let max = self.limits.max_line_bytes;
        let mut line = Vec::new();
        let read = (&mut *self.src)
            .take(max as u64)
            .read_until(b'\n', &mut line)
            .await
            .map_err(RelayError::upstream)?;

        if read == 0 {
            return Ok(None);
        }
        if !line.ends_with(b"\n") && read >= max {
            return Err(RelayError::MalformedChunkSize(format!(
                "line exceeds {max} bytes"
            )));
        }
        Ok(Some(line))
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Parse a chunk-size line, ignoring any `;extension`.
fn parse_chunk_size(line: &[u8]) -> RelayResult<u64> {
    let line = trim_line_end(line);
    let digits = match line.iter().position(|&b| b == b';') {
        Some(pos) => &line[..pos],
        None => line,
    };
    let digits = digits.trim_ascii();

    let malformed = || RelayError::MalformedChunkSize(String::from_utf8_lossy(line).into_owned());

    if digits.is_empty() || !digits.iter().all(u8::is_ascii_hexdigit) {
        return Err(malformed());
    }
    // all ASCII hex digits, so valid UTF-8
    let text = std::str::from_utf8(digits).map_err(|_| malformed())?;
    u64::from_str_radix(text, 16).map_err(|_| malformed())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn relay(input: &[u8]) -> (RelayResult<u64>, Vec<u8>) {
        let mut src = input;
        let mut out = Vec::new();
        let result = relay_chunked(&mut src, &mut out, ChunkLimits::default()).await;
        (result, out)
    }

    #[test]
    fn header_is_lowercase_unpadded_hex() {
        assert_eq!(chunk_header(5), "5\r\n");
        assert_eq!(chunk_header(255), "ff\r\n");
        assert_eq!(chunk_header(4096), "1000\r\n");
    }

    #[tokio::test]
    async fn single_chunk_encoding() {
        let mut out = Vec::new();
        write_single_chunk(&mut out, b"hello").await.unwrap();
        assert_eq!(out, b"5\r\nhello\r\n0\r\n\r\n");
    }

    #[tokio::test]
    async fn empty_buffer_is_only_terminator() {
        let mut out = Vec::new();
        write_single_chunk(&mut out, b"").await.unwrap();
        assert_eq!(out, b"0\r\n\r\n");
    }

    #[tokio::test]
    async fn single_chunk_decodes_to_original() {
        let body: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
        let mut framed = Vec::new();
        write_single_chunk(&mut framed, &body).await.unwrap();

        let mut src = &framed[..];
        let decoded = read_chunked(&mut src, ChunkLimits::default()).await.unwrap();
        assert_eq!(decoded, body);
        assert!(src.is_empty());
    }

    #[tokio::test]
    async fn relay_recomputes_headers_and_drops_extensions() {
        let (result, out) =
            relay(b"5;name=value\r\nhello\r\n0A\r\n0123456789\r\n0\r\nExpires: never\r\n\r\n").await;
        assert_eq!(result.unwrap(), 15);
        assert_eq!(out, b"5\r\nhello\r\na\r\n0123456789\r\n0\r\n\r\n");
    }

    #[tokio::test]
    async fn relay_stops_at_terminator() {
        let mut src: &[u8] = b"3\r\nabc\r\n0\r\n\r\nHTTP/1.1 200 OK\r\n";
        let mut out = Vec::new();
        relay_chunked(&mut src, &mut out, ChunkLimits::default())
            .await
            .unwrap();
        assert_eq!(src, b"HTTP/1.1 200 OK\r\n");
    }

    #[tokio::test]
    async fn non_hex_size_is_malformed() {
        for line in ["zz", "-5", "+5", "", "5 5"] {
            let input = format!("{line}\r\nhello\r\n0\r\n\r\n");
            let (result, out) = relay(input.as_bytes()).await;
            assert!(
                matches!(result, Err(RelayError::MalformedChunkSize(_))),
                "line {line:?} gave {result:?}"
            );
            assert!(out.is_empty());
        }
    }

    #[tokio::test]
    async fn overflowing_size_is_malformed() {
        let (result, _) = relay(b"1ffffffffffffffff\r\n").await;
        assert!(matches!(result, Err(RelayError::MalformedChunkSize(_))));
    }

    #[tokio::test]
    async fn malformed_size_after_good_chunk_writes_nothing_more() {
        let (result, out) = relay(b"2\r\nok\r\nzz\r\nmore\r\n0\r\n\r\n").await;
        assert!(matches!(result, Err(RelayError::MalformedChunkSize(_))));
        assert_eq!(out, b"2\r\nok\r\n");
    }

    #[tokio::test]
    async fn oversized_chunk_is_rejected() {
        let mut src: &[u8] = b"100\r\n";
        let mut out = Vec::new();
        let limits = ChunkLimits {
            max_chunk_size: 16,
            max_line_bytes: 64,
        };
        let err = relay_chunked(&mut src, &mut out, limits).await.unwrap_err();
        assert!(matches!(err, RelayError::ChunkTooLarge { size: 256, limit: 16 }));
    }

    #[tokio::test]
    async fn truncated_chunk_is_transfer_error() {
        let (result, _) = relay(b"a\r\nshort").await;
        assert!(matches!(result, Err(RelayError::Transfer { .. })));
    }

    #[tokio::test]
    async fn overlong_size_line_is_malformed() {
        let mut src: &[u8] = b"0000000000000000000000000000000000000005\r\n";
        let mut out = Vec::new();
        let limits = ChunkLimits {
            max_chunk_size: 1024,
            max_line_bytes: 8,
        };
        let err = relay_chunked(&mut src, &mut out, limits).await.unwrap_err();
        assert!(matches!(err, RelayError::MalformedChunkSize(_)));
    }
}
