//! The fetch capability: the only place a request leaves the process.
//!
//! The client never talks to the network itself. It hands each attempt's [`Request`] and the
//! attempt's effective [`AbortSignal`] to a [`Fetch`] implementation and classifies what comes
//! back. Adapters exist for async closures ([`fetch_fn`]), for any tower service
//! ([`ServiceFetch`]), and, behind the `reqwest` feature, for a real HTTP transport.
//!
//! An implementation may watch the signal to stop work early. It does not have to: when the
//! signal fires, the in-flight fetch future is dropped.

use crate::error::FetchError;
use crate::request::Request;
use crate::response::Response;
use crate::signal::AbortSignal;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use tower::ServiceExt;
use tower_service::Service;

/// Sends one request and returns its response.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: Request, signal: AbortSignal) -> Result<Response, FetchError>;
}

/// [`Fetch`] backed by an async closure. Built by [`fetch_fn`].
#[derive(Clone)]
pub struct FnFetch<F> {
    f: F,
}

impl<F> fmt::Debug for FnFetch<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnFetch(<fn>)")
    }
}

/// Wrap an async closure as a fetch capability.
///
/// ```rust
/// use ninefetch::{fetch_fn, Response};
/// use http::StatusCode;
///
/// let fetch = fetch_fn(|_request, _signal| async { Ok(Response::new(StatusCode::NO_CONTENT)) });
/// # let _ = fetch;
/// ```
pub fn fetch_fn<F, Fut>(f: F) -> FnFetch<F>
where
    F: Fn(Request, AbortSignal) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, FetchError>> + Send + 'static,
{
    FnFetch { f }
}

#[async_trait]
impl<F, Fut> Fetch for FnFetch<F>
where
    F: Fn(Request, AbortSignal) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, FetchError>> + Send + 'static,
{
    async fn fetch(&self, request: Request, signal: AbortSignal) -> Result<Response, FetchError> {
        (self.f)(request, signal).await
    }
}

/// [`Fetch`] backed by a tower service. The service is cloned per call and driven with
/// `oneshot`, so readiness is respected. The abort signal is not forwarded; cancellation drops
/// the service future.
#[derive(Debug, Clone)]
pub struct ServiceFetch<S> {
    inner: S,
}

impl<S> ServiceFetch<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S> Fetch for ServiceFetch<S>
where
    S: Service<Request, Response = Response, Error = FetchError> + Clone + Send + Sync + 'static,
    S::Future: Send,
{
    async fn fetch(&self, request: Request, _signal: AbortSignal) -> Result<Response, FetchError> {
        self.inner.clone().oneshot(request).await
    }
}

#[cfg(feature = "reqwest")]
pub use self::reqwest_fetch::ReqwestFetch;

#[cfg(feature = "reqwest")]
mod reqwest_fetch {
    use super::*;
    use crate::error::ErrorCode;

    /// Network transport over a `reqwest::Client`.
    #[derive(Debug, Clone, Default)]
    pub struct ReqwestFetch {
        client: reqwest::Client,
    }

    impl ReqwestFetch {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_client(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    fn classify(error: reqwest::Error) -> FetchError {
        let code = if error.is_timeout() {
            ErrorCode::Timeout
        } else if error.is_connect() {
            ErrorCode::Connect
        } else if error.is_body() || error.is_decode() {
            ErrorCode::Read
        } else {
            ErrorCode::Other
        };
        FetchError::new(code, error.to_string()).with_source(error)
    }

    #[async_trait]
    impl Fetch for ReqwestFetch {
        async fn fetch(
            &self,
            request: Request,
            _signal: AbortSignal,
        ) -> Result<Response, FetchError> {
            let mut builder = self
                .client
                .request(request.method().clone(), request.url().clone())
                .headers(request.headers().clone());
            if let Some(body) = request.body() {
                builder = builder.body(body.clone());
            }

            let response = builder.send().await.map_err(classify)?;
            let status = response.status();
            let headers = response.headers().clone();
            let url = response.url().clone();
            let body = response.bytes().await.map_err(|e| {
                FetchError::new(ErrorCode::Read, e.to_string()).with_source(e)
            })?;

            Ok(Response::new(status).with_headers(headers).with_url(url).with_body(body))
        }
    }
}
