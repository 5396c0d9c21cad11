//! HTTP intercepting proxy response relay.
//!
//! Takes a response arriving from an upstream server, lets registered hooks
//! inspect and rewrite it, then re-serializes it onto the client connection
//! with the right framing and content-encoding.

pub mod config;
pub mod http;
pub mod net;
pub mod observability;
pub mod relay;

pub use config::schema::ProxyConfig;
pub use http::ProxyServer;
pub use relay::{HookContext, HookRegistry, ResponseHook, ResponsePipeline, Session};
