//! Responses and the lazy wrapper callers receive.
//!
//! A [`LazyResponse`] is returned synchronously by every client call. Nothing is sent until it
//! is awaited or one of its body-read methods is called. All of them share one execution: the
//! first to be polled spawns the call onto the runtime, later ones (and clones of the wrapper)
//! await that same outcome. Dropping a read midway does not cancel the call, so a later read
//! picks up the running execution instead of dispatching again.
//!
//! The body is single-use. The first successful read fixes its representation; reading it again
//! the same way returns the same value, reading it a different way fails with
//! [`Error::BodyAlreadyConsumed`].

use crate::execution::Execution;
use crate::hooks;
use crate::{Error, Result};
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared};
use http::header::{HeaderMap, HeaderValue, IntoHeaderName};
use http::StatusCode;
use serde::de::DeserializeOwned;
use std::fmt;
use std::future::IntoFuture;
use std::sync::{Arc, OnceLock};
use url::{form_urlencoded, Url};

/// A fully buffered HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    url: Option<Url>,
    body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self { status, headers: HeaderMap::new(), url: None, body: Bytes::new() }
    }

    pub fn with_header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Final URL, after any redirects the transport followed.
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// 2xx.
    pub fn is_ok(&self) -> bool {
        self.status.is_success()
    }
}

/// Representation a body read decodes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Json,
    Text,
    Bytes,
    Form,
}

impl BodyKind {
    /// `Accept` header value advertised when this read triggers the call.
    pub fn accept(&self) -> &'static str {
        match self {
            BodyKind::Json => "application/json",
            BodyKind::Text => "text/*",
            BodyKind::Bytes => "*/*",
            BodyKind::Form => "application/x-www-form-urlencoded",
        }
    }
}

impl fmt::Display for BodyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BodyKind::Json => "json",
            BodyKind::Text => "text",
            BodyKind::Bytes => "bytes",
            BodyKind::Form => "form",
        })
    }
}

type Outcome = Result<Option<Response>>;

struct Inner {
    execution: Arc<Execution>,
    running: OnceLock<Shared<BoxFuture<'static, Outcome>>>,
    consumed: OnceLock<BodyKind>,
}

/// Deferred result of a client call. Cheap to clone; clones share the execution.
#[derive(Clone)]
pub struct LazyResponse {
    inner: Arc<Inner>,
}

impl fmt::Debug for LazyResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyResponse")
            .field("started", &self.inner.running.get().is_some())
            .field("consumed", &self.inner.consumed.get())
            .finish()
    }
}

impl LazyResponse {
    pub(crate) fn new(execution: Execution) -> Self {
        Self {
            inner: Arc::new(Inner {
                execution: Arc::new(execution),
                running: OnceLock::new(),
                consumed: OnceLock::new(),
            }),
        }
    }

    /// Run the call (once) and return the raw outcome without touching the body.
    ///
    /// `Ok(None)` means a `before_retry` hook stopped the call.
    pub async fn send(&self) -> Result<Option<Response>> {
        self.settle(None).await
    }

    /// Parse the body as JSON. An empty body or a 204 parses as `null`.
    pub async fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let response = self.consume(BodyKind::Json).await?;
        let body: &[u8] =
            if response.status() == StatusCode::NO_CONTENT || response.body().is_empty() {
                b"null"
            } else {
                response.body()
            };
        serde_json::from_slice(body)
            .map_err(|e| Error::Decode { kind: BodyKind::Json, message: e.to_string() })
    }

    /// Body as text. Invalid UTF-8 sequences are replaced.
    pub async fn text(&self) -> Result<String> {
        let response = self.consume(BodyKind::Text).await?;
        Ok(String::from_utf8_lossy(response.body()).into_owned())
    }

    pub async fn bytes(&self) -> Result<Bytes> {
        let response = self.consume(BodyKind::Bytes).await?;
        Ok(response.body().clone())
    }

    /// Body parsed as `application/x-www-form-urlencoded` pairs.
    pub async fn form(&self) -> Result<Vec<(String, String)>> {
        let response = self.consume(BodyKind::Form).await?;
        Ok(form_urlencoded::parse(response.body()).into_owned().collect())
    }

    /// Run the call and map its outcome through the `before_return` hooks, decoding the value
    /// the last of them produced into `T`.
    ///
    /// Counts as a JSON read of the body. When no hook produces a value this is [`json`], and a
    /// stopped call fails with [`Error::NoResponse`].
    ///
    /// [`json`]: LazyResponse::json
    pub async fn returning<T: DeserializeOwned>(&self) -> Result<T> {
        let outcome = self.settle(Some(BodyKind::Json)).await?;
        if outcome.is_some() {
            self.claim(BodyKind::Json)?;
        }
        let options = self.inner.execution.options()?;
        match hooks::run_before_return(&options, outcome.as_ref()).await? {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| Error::Decode { kind: BodyKind::Json, message: e.to_string() }),
            None => self.json().await,
        }
    }

    /// The first caller spawns the execution; everyone awaits the same shared handle.
    async fn settle(&self, accept: Option<BodyKind>) -> Outcome {
        let running = self.inner.running.get_or_init(|| {
            let execution = self.inner.execution.clone();
            let task = tokio::spawn(async move { execution.run(accept).await });
            async move {
                match task.await {
                    Ok(outcome) => outcome,
                    Err(error) if error.is_panic() => std::panic::resume_unwind(error.into_panic()),
                    Err(error) => Err(Error::Interrupted(error.to_string())),
                }
            }
            .boxed()
            .shared()
        });
        running.clone().await
    }

    fn claim(&self, kind: BodyKind) -> Result<()> {
        let consumed = *self.inner.consumed.get_or_init(|| kind);
        if consumed != kind {
            return Err(Error::BodyAlreadyConsumed { consumed, requested: kind });
        }
        Ok(())
    }

    async fn consume(&self, kind: BodyKind) -> Result<Response> {
        let response = self.settle(Some(kind)).await?.ok_or(Error::NoResponse)?;
        self.claim(kind)?;
        Ok(response)
    }
}

impl IntoFuture for LazyResponse {
    type Output = Result<Option<Response>>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.send().await })
    }
}
