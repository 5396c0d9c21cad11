//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the response relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Response relay tunables.
    pub relay: RelayConfig,

    /// Compression levels for re-encoding buffered bodies.
    pub compression: CompressionConfig,

    /// Upstream connection settings.
    pub upstream: UpstreamConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind_address: String,

    /// Maximum concurrent client connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Relay tunables.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Intermediate buffer size for streamed bodies, in bytes.
    pub buffer_size: usize,

    /// Largest single upstream chunk held in memory, in bytes.
    pub max_chunk_size: u64,

    /// Longest chunk-size or trailer line accepted, in bytes.
    pub max_line_bytes: usize,

    /// Largest upstream response head accepted, in bytes.
    pub max_head_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_size: 8192,
            max_chunk_size: 16 * 1024 * 1024, // 16MB
            max_line_bytes: 4096,
            max_head_bytes: 64 * 1024,
        }
    }
}

/// Compression levels.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// gzip/deflate level (0-9).
    pub flate_level: u32,

    /// Brotli quality (0-11).
    pub brotli_quality: u32,

    /// Brotli window size as log2 (10-24).
    pub brotli_window: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            flate_level: 6,
            brotli_quality: 5,
            brotli_window: 22,
        }
    }
}

/// Upstream connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON instead of human-readable text.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
