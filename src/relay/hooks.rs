//! Response-observation hooks.
//!
//! # Responsibilities
//! - Define the hook contract (`ResponseHook`)
//! - Hold the hooks a pipeline invokes (`HookRegistry`)
//! - Give running hooks shared access to the session (`HookContext`,
//!   `SessionGuard`)
//!
//! # Design Decisions
//! - The registry is passed to the pipeline explicitly, never global
//! - Hooks run concurrently on the relay task and share the session through
//!   an async mutex
//! - Hooks may mutate the response until the pipeline locks it

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio::sync::{Mutex, MutexGuard};

use crate::relay::body::buffer_body;
use crate::relay::codec::CodecRegistry;
use crate::relay::error::{BoxError, RelayResult};
use crate::relay::pipeline::RelaySettings;
use crate::relay::session::Session;

/// Outcome of a single hook invocation.
pub type HookResult = Result<(), BoxError>;

/// A callback invoked for every response before it is written to the client.
///
/// Returning an error aborts the relay; the client sees a closed connection.
pub trait ResponseHook: Send + Sync {
    /// Name used in logs and `HookFailure` errors.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn on_response<'a>(&'a self, cx: &'a HookContext<'_>) -> BoxFuture<'a, HookResult>;
}

/// Hooks registered with a pipeline.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn ResponseHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, hook: H)
    where
        H: ResponseHook + 'static,
    {
        self.hooks.push(Arc::new(hook));
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<H>(mut self, hook: H) -> Self
    where
        H: ResponseHook + 'static,
    {
        self.register(hook);
        self
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ResponseHook>> {
        self.hooks.iter()
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.hooks.iter().map(|h| h.name()))
            .finish()
    }
}

/// Shared view of a session handed to hooks.
pub struct HookContext<'s> {
    session: Mutex<&'s mut Session>,
    codecs: &'s CodecRegistry,
    settings: &'s RelaySettings,
}

impl<'s> HookContext<'s> {
    pub(crate) fn new(
        session: &'s mut Session,
        codecs: &'s CodecRegistry,
        settings: &'s RelaySettings,
    ) -> Self {
        Self {
            session: Mutex::new(session),
            codecs,
            settings,
        }
    }

    /// Exclusive access to the session for reading or editing the response.
    ///
    /// Body access goes through the returned guard. Drop it before calling
    /// `session()` again from the same hook.
    pub async fn session(&self) -> SessionGuard<'_, 's> {
        SessionGuard {
            session: self.session.lock().await,
            codecs: self.codecs,
            settings: self.settings,
        }
    }
}

/// Locked view of the session held by one hook.
pub struct SessionGuard<'a, 's> {
    session: MutexGuard<'a, &'s mut Session>,
    codecs: &'a CodecRegistry,
    settings: &'a RelaySettings,
}

impl SessionGuard<'_, '_> {
    /// The response body, read off the upstream connection and decoded on
    /// first use.
    pub async fn response_body(&mut self) -> RelayResult<Bytes> {
        buffer_body(&mut **self.session, self.codecs, self.settings).await
    }

    /// Replace the body with plain content.
    pub fn set_response_body(&mut self, body: impl Into<Bytes>) -> RelayResult<()> {
        self.session.response_or_err()?.set_body(body)
    }
}

impl Deref for SessionGuard<'_, '_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        &**self.session
    }
}

impl DerefMut for SessionGuard<'_, '_> {
    fn deref_mut(&mut self) -> &mut Session {
        &mut **self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::response::{HttpVersion, ResponseMetadata};
    use crate::relay::error::RelayError;

    struct Named;

    impl ResponseHook for Named {
        fn name(&self) -> &str {
            "named"
        }

        fn on_response<'a>(&'a self, _cx: &'a HookContext<'_>) -> BoxFuture<'a, HookResult> {
            Box::pin(async { Ok(()) })
        }
    }

    struct Anonymous;

    impl ResponseHook for Anonymous {
        fn on_response<'a>(&'a self, _cx: &'a HookContext<'_>) -> BoxFuture<'a, HookResult> {
            Box::pin(async { Ok(()) })
        }
    }

    #[test]
    fn registry_keeps_registration_order() {
        let mut registry = HookRegistry::new().with(Named);
        registry.register(Anonymous);

        assert_eq!(registry.len(), 2);
        let names: Vec<_> = registry.iter().map(|h| h.name().to_string()).collect();
        assert_eq!(names[0], "named");
        assert!(names[1].ends_with("Anonymous"));
    }

    #[tokio::test]
    async fn guard_buffers_and_replaces_body() {
        let mut session = Session::new(tokio::io::sink(), &b"hello"[..]).with_response(
            ResponseMetadata::new(HttpVersion::HTTP_11, 200, "OK").with_header("Content-Length", "5"),
        );
        let codecs = CodecRegistry::default();
        let settings = RelaySettings::default();
        let cx = HookContext::new(&mut session, &codecs, &settings);

        let mut guard = cx.session().await;
        assert_eq!(guard.response_body().await.unwrap(), "hello");
        // Second read comes from the buffer, not the drained upstream.
        assert_eq!(guard.response_body().await.unwrap(), "hello");

        guard.set_response_body("bye").unwrap();
        let response = guard.response().unwrap();
        assert_eq!(response.body().unwrap(), "bye");
        assert_eq!(response.content_length(), Some(3));
    }

    #[tokio::test]
    async fn guard_refuses_body_after_lock() {
        let mut response = ResponseMetadata::new(HttpVersion::HTTP_11, 200, "OK");
        response.lock();
        let mut session = Session::new(tokio::io::sink(), &b""[..]).with_response(response);
        let codecs = CodecRegistry::default();
        let settings = RelaySettings::default();
        let cx = HookContext::new(&mut session, &codecs, &settings);

        let mut guard = cx.session().await;
        assert!(matches!(
            guard.response_body().await,
            Err(RelayError::ResponseLocked(_))
        ));
        assert!(matches!(
            guard.set_response_body("x"),
            Err(RelayError::ResponseLocked(_))
        ));
    }

    #[tokio::test]
    async fn guard_is_released_between_calls() {
        let mut session = Session::new(tokio::io::sink(), &b""[..])
            .with_response(ResponseMetadata::new(HttpVersion::HTTP_11, 204, "No Content"));
        let codecs = CodecRegistry::default();
        let settings = RelaySettings::default();
        let cx = HookContext::new(&mut session, &codecs, &settings);

        let first = cx.session().await.response_body().await.unwrap();
        let second = tokio::time::timeout(std::time::Duration::from_secs(1), cx.session())
            .await
            .expect("session lock still held");
        assert!(first.is_empty());
        assert_eq!(second.response().unwrap().status(), 204);
    }
}
