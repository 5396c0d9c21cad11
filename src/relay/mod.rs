//! Response relay engine.
//!
//! # Data Flow
//! ```text
//! upstream bytes
//!     → session.rs (owns both connection halves)
//!     → hooks.rs (concurrent observers, may buffer the body via body.rs)
//!     → pipeline.rs (lock, serialize head)
//!     → chunked.rs / copier.rs (stream the body)
//!     → codec.rs (re-encode a buffered body)
//!     → client bytes
//! ```
//!
//! # Design Decisions
//! - Every failure aborts the session; nothing is written after an error
//! - The codec and hook registries are shared behind `Arc` and never global

mod body;
pub mod chunked;
pub mod codec;
pub mod copier;
pub mod error;
pub mod hooks;
pub mod pipeline;
pub mod session;

pub use codec::{CodecRegistry, Encoding};
pub use error::{RelayError, RelayResult};
pub use hooks::{HookContext, HookRegistry, HookResult, ResponseHook, SessionGuard};
pub use pipeline::{RelayStats, ResponsePipeline};
pub use session::{RelayState, Session};
