//! Content-encoding codec registry.
//!
//! # Responsibilities
//! - Resolve a `content-encoding` token to a codec once per response
//! - Compress buffered bodies before they are written to the client
//! - Decompress buffered bodies so hooks see plain content
//!
//! # Design Decisions
//! - Closed `Encoding` enum; unknown tokens fail with `UnsupportedEncoding`
//! - Registry holds only immutable levels, so one `Arc` serves every session
//! - Decompression failures are non-fatal: the body passes through untouched
//! - `deflate` is written zlib-wrapped (RFC 9110), not as a raw deflate
//!   stream; decoding accepts either form

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use bytes::Bytes;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;

use crate::config::CompressionConfig;
use crate::relay::error::{RelayError, RelayResult};

const BROTLI_BUFFER_SIZE: usize = 4096;

/// Content encodings the relay can transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Identity,
    Gzip,
    Deflate,
    Brotli,
}

impl Encoding {
    /// Canonical token as it appears in `content-encoding`.
    pub fn token(&self) -> &'static str {
        match self {
            Encoding::Identity => "identity",
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
            Encoding::Brotli => "br",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for Encoding {
    type Err = RelayError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let trimmed = token.trim();
        if trimmed.eq_ignore_ascii_case("gzip") || trimmed.eq_ignore_ascii_case("x-gzip") {
            Ok(Encoding::Gzip)
        } else if trimmed.eq_ignore_ascii_case("deflate") {
            Ok(Encoding::Deflate)
        } else if trimmed.eq_ignore_ascii_case("br") {
            Ok(Encoding::Brotli)
        } else if trimmed.eq_ignore_ascii_case("identity") {
            Ok(Encoding::Identity)
        } else {
            Err(RelayError::UnsupportedEncoding(trimmed.to_string()))
        }
    }
}

/// Direction of a codec transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Compress,
    Decompress,
}

/// Compression parameters shared by every codec.
#[derive(Debug, Clone, Copy)]
struct Levels {
    flate: u32,
    brotli_quality: u32,
    brotli_window: u32,
}

/// A resolved codec for one encoding.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    encoding: Encoding,
    levels: Levels,
}

impl Codec {
    /// The encoding this codec implements.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Transform `data` in the given direction.
    pub fn transform(&self, direction: Direction, data: &[u8]) -> RelayResult<Vec<u8>> {
        let result = match direction {
            Direction::Compress => self.compress_inner(data),
            Direction::Decompress => self.decompress_inner(data),
        };
        result.map_err(|source| RelayError::Codec {
            encoding: self.encoding,
            source,
        })
    }

    pub fn compress(&self, data: &[u8]) -> RelayResult<Vec<u8>> {
        self.transform(Direction::Compress, data)
    }

    pub fn decompress(&self, data: &[u8]) -> RelayResult<Vec<u8>> {
        self.transform(Direction::Decompress, data)
    }

    fn compress_inner(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        match self.encoding {
            Encoding::Identity => Ok(data.to_vec()),
            Encoding::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.levels.flate));
                encoder.write_all(data)?;
                encoder.finish()
            }
            Encoding::Deflate => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(self.levels.flate));
                encoder.write_all(data)?;
                encoder.finish()
            }
            Encoding::Brotli => {
                let mut writer = brotli::CompressorWriter::new(
                    Vec::new(),
                    BROTLI_BUFFER_SIZE,
                    self.levels.brotli_quality,
                    self.levels.brotli_window,
                );
                writer.write_all(data)?;
                Ok(writer.into_inner())
            }
        }
    }

    fn decompress_inner(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len().saturating_mul(2));
        match self.encoding {
            Encoding::Identity => out.extend_from_slice(data),
            Encoding::Gzip => {
                GzDecoder::new(data).read_to_end(&mut out)?;
            }
            Encoding::Deflate => {
                // Servers disagree on zlib-wrapped vs raw deflate.
                if ZlibDecoder::new(data).read_to_end(&mut out).is_err() {
                    out.clear();
                    DeflateDecoder::new(data).read_to_end(&mut out)?;
                }
            }
            Encoding::Brotli => {
                brotli::Decompressor::new(data, BROTLI_BUFFER_SIZE).read_to_end(&mut out)?;
            }
        }
        Ok(out)
    }
}

/// Outcome of a best-effort decompression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Body was decoded to plain content.
    Plain(Bytes),
    /// Token unknown or stream corrupt; body is still encoded.
    Passthrough(Bytes),
}

/// Stateless registry mapping encoding tokens to codecs.
#[derive(Debug, Clone)]
pub struct CodecRegistry {
    levels: Levels,
}

impl CodecRegistry {
    /// Create a registry from compression configuration.
    pub fn new(config: &CompressionConfig) -> Self {
        Self {
            levels: Levels {
                flate: config.flate_level,
                brotli_quality: config.brotli_quality,
                brotli_window: config.brotli_window,
            },
        }
    }

    /// Resolve a token to a codec.
    pub fn resolve(&self, token: &str) -> RelayResult<Codec> {
        let encoding = token.parse::<Encoding>()?;
        Ok(self.codec(encoding))
    }

    /// Codec for an already-parsed encoding.
    pub fn codec(&self, encoding: Encoding) -> Codec {
        Codec {
            encoding,
            levels: self.levels,
        }
    }

    /// Compress a body for the claimed encoding. Unknown tokens are an error.
    pub fn compress(&self, token: &str, data: &[u8]) -> RelayResult<Bytes> {
        let codec = self.resolve(token)?;
        codec.compress(data).map(Bytes::from)
    }

    /// Decompress a body, passing it through untouched on any failure.
    pub fn decompress(&self, token: &str, data: Bytes) -> Decoded {
        let codec = match self.resolve(token) {
            Ok(codec) => codec,
            Err(e) => {
                tracing::debug!(error = %e, "Leaving body encoded");
                return Decoded::Passthrough(data);
            }
        };
        match codec.decompress(&data) {
            Ok(plain) => Decoded::Plain(Bytes::from(plain)),
            Err(e) => {
                tracing::debug!(error = %e, "Body failed to decode, leaving it encoded");
                Decoded::Passthrough(data)
            }
        }
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new(&CompressionConfig::default())
    }
}
