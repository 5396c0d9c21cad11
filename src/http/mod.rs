//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! client connection
//!     → server.rs (parse absolute-form request, connect upstream)
//!     → upstream.rs (read response head, fold interim statuses)
//!     → response.rs (metadata hooks inspect and edit)
//!     → headers.rs (proxy header fix-up before serialization)
//!     → relay pipeline writes the response to the client
//! ```

mod head;
pub mod headers;
pub mod response;
pub mod server;
pub mod upstream;

pub use headers::{Header, HeaderList};
pub use response::{BodyFraming, HttpVersion, ResponseMetadata};
pub use server::ProxyServer;
