//! Bounded reading of an HTTP message head.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Why a head could not be read.
#[derive(Debug)]
pub(crate) enum HeadError {
    /// Head grew past the byte limit.
    TooLarge(usize),
    /// Peer closed before sending a head.
    Eof,
    Io(std::io::Error),
}

/// Read raw head bytes up to and including the blank line.
///
/// Leading blank lines are skipped but still count against `max_bytes`.
/// The reader is left positioned at the first body byte.
pub(crate) async fn read_head<R>(reader: &mut R, max_bytes: usize) -> Result<Vec<u8>, HeadError>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut head = Vec::with_capacity(1024);
    let mut skipped = 0usize;

    loop {
        let budget = max_bytes.saturating_sub(skipped + head.len());
        if budget == 0 {
            return Err(HeadError::TooLarge(max_bytes));
        }

        let start = head.len();
        let read = (&mut *reader)
            .take(budget as u64)
            .read_until(b'\n', &mut head)
            .await
            .map_err(HeadError::Io)?;

        if read == 0 {
            return Err(HeadError::Eof);
        }

        let line = &head[start..];
        let blank = line == b"\r\n" || line == b"\n";
        if blank && start == 0 {
            skipped += head.len();
            head.clear();
            continue;
        }
        if blank {
            return Ok(head);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn skips_leading_blank_lines() {
        let mut src: &[u8] = b"\r\nGET / HTTP/1.1\r\n\r\nbody";
        let head = read_head(&mut src, 1024).await.unwrap();
        assert_eq!(head, b"GET / HTTP/1.1\r\n\r\n");
        assert_eq!(src, b"body");
    }

    #[tokio::test]
    async fn limit_and_eof() {
        let mut src: &[u8] = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        assert!(matches!(read_head(&mut src, 10).await, Err(HeadError::TooLarge(10))));

        let mut empty: &[u8] = b"";
        assert!(matches!(read_head(&mut empty, 10).await, Err(HeadError::Eof)));
    }

    #[tokio::test]
    async fn blank_line_flood_hits_the_limit() {
        let flood = "\r\n".repeat(100);
        let mut src = flood.as_bytes();
        assert!(matches!(read_head(&mut src, 16).await, Err(HeadError::TooLarge(16))));

        let mut endless = tokio::io::BufReader::new(tokio::io::repeat(b'\n'));
        assert!(matches!(read_head(&mut endless, 64).await, Err(HeadError::TooLarge(64))));
    }

    #[tokio::test]
    async fn skipped_lines_share_the_budget() {
        let mut src: &[u8] = b"\r\n\r\nGET / HTTP/1.1\r\n\r\n";
        assert!(matches!(read_head(&mut src, 20).await, Err(HeadError::TooLarge(20))));
    }

    #[tokio::test]
    async fn eof_after_blank_lines() {
        let mut empty: &[u8] = b"\r\n";
        assert!(matches!(read_head(&mut empty, 10).await, Err(HeadError::Eof)));
    }
}
