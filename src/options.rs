//! Option merging.
//!
//! [`Options`] is a partial configuration: every field may be unset. Partials are combined
//! left-to-right with [`Options::merge`] (parent defaults, then instance defaults, then per-call
//! overrides) and resolved once into an immutable [`NormalizedOptions`] by
//! [`Options::normalize`]. Merge rules per field:
//!
//! - Scalars (`method`, `timeout`, `prefix_url`, `throw_on_http_error`, `signal`, bodies): last
//!   set value wins.
//! - Headers: case-insensitive union, later writes replace earlier ones, and
//!   [`Options::remove_header`] deletes a key inherited from an earlier partial.
//! - Search params: a later value replaces the earlier one wholesale.
//! - Hooks: concatenated, earlier partials' hooks run first.
//! - Retry: a full [`RetryPolicy`] replaces; a bare limit is applied onto the inherited policy.
//!
//! Merging never mutates its inputs.

use crate::hooks::Hooks;
use crate::retry::{RetryPolicy, RetrySpec};
use crate::signal::AbortSignal;
use crate::timeout::{Timeout, DEFAULT_TIMEOUT, MAX_TIMEOUT};
use crate::{Error, Result};
use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Method;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use url::form_urlencoded;

/// Ordered query parameters. Replaced wholesale on merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParams {
    pairs: Vec<(String, String)>,
}

impl SearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an `application/x-www-form-urlencoded` query string, with or without a leading `?`.
    pub fn parse(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        form_urlencoded::parse(query.as_bytes()).into_owned().collect()
    }

    pub fn append(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.push((key.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn to_query_string(&self) -> String {
        form_urlencoded::Serializer::new(String::new()).extend_pairs(&self.pairs).finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SearchParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self { pairs: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }
}

impl From<&str> for SearchParams {
    fn from(query: &str) -> Self {
        Self::parse(query)
    }
}

impl<K: Into<String>, V: Into<String>> From<Vec<(K, V)>> for SearchParams {
    fn from(pairs: Vec<(K, V)>) -> Self {
        pairs.into_iter().collect()
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for SearchParams {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// Request payload after normalization.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Serialized to a JSON string on every build.
    Json(serde_json::Value),
    Bytes(Bytes),
    /// Serialized as `application/x-www-form-urlencoded`.
    Form(Vec<(String, String)>),
}

/// Partial, builder-style request configuration.
#[derive(Clone, Default)]
pub struct Options {
    method: Option<Method>,
    headers: Vec<(HeaderName, Option<HeaderValue>)>,
    search_params: Option<SearchParams>,
    json: Option<std::result::Result<serde_json::Value, String>>,
    body: Option<RequestBody>,
    prefix_url: Option<String>,
    timeout: Option<Timeout>,
    retry: Option<RetrySpec>,
    hooks: Hooks,
    throw_on_http_error: Option<bool>,
    signal: Option<AbortSignal>,
    invalid: Vec<String>,
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("search_params", &self.search_params)
            .field("json", &self.json)
            .field("body", &self.body)
            .field("prefix_url", &self.prefix_url)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("hooks", &self.hooks)
            .field("throw_on_http_error", &self.throw_on_http_error)
            .field("signal", &self.signal.as_ref().map(|_| "<signal>"))
            .finish()
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Set a header, replacing any inherited value for the same (case-insensitive) name.
    ///
    /// Invalid names or values are reported as a configuration error when the options are
    /// normalized.
    pub fn header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        K::Error: fmt::Display,
        V: TryInto<HeaderValue>,
        V::Error: fmt::Display,
    {
        match (name.try_into(), value.try_into()) {
            (Ok(name), Ok(value)) => self.headers.push((name, Some(value))),
            (Err(e), _) => self.invalid.push(format!("invalid header name: {e}")),
            (_, Err(e)) => self.invalid.push(format!("invalid header value: {e}")),
        }
        self
    }

    /// Delete a header inherited from an earlier partial.
    pub fn remove_header<K>(mut self, name: K) -> Self
    where
        K: TryInto<HeaderName>,
        K::Error: fmt::Display,
    {
        match name.try_into() {
            Ok(name) => self.headers.push((name, None)),
            Err(e) => self.invalid.push(format!("invalid header name: {e}")),
        }
        self
    }

    pub fn search_params(mut self, params: impl Into<SearchParams>) -> Self {
        self.search_params = Some(params.into());
        self
    }

    /// JSON payload. Serialization failures surface as a build error when the call runs.
    pub fn json<T: Serialize + ?Sized>(mut self, payload: &T) -> Self {
        self.json = Some(serde_json::to_value(payload).map_err(|e| e.to_string()));
        self
    }

    /// Raw body bytes. Mutually exclusive with [`Options::json`].
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(RequestBody::Bytes(body.into()));
        self
    }

    /// URL-encoded form body. Mutually exclusive with [`Options::json`].
    pub fn form<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let pairs = pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self.body = Some(RequestBody::Form(pairs));
        self
    }

    pub fn prefix_url(mut self, prefix: impl Into<String>) -> Self {
        self.prefix_url = Some(prefix.into());
        self
    }

    /// Per-attempt timeout. Must be non-zero and at most [`MAX_TIMEOUT`].
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(Timeout::After(timeout));
        self
    }

    pub fn no_timeout(mut self) -> Self {
        self.timeout = Some(Timeout::Disabled);
        self
    }

    /// Retry limit (`u32`) or a full [`RetryPolicy`].
    pub fn retry(mut self, retry: impl Into<RetrySpec>) -> Self {
        self.retry = Some(retry.into());
        self
    }

    /// Append hooks after the ones already configured on this partial.
    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = self.hooks.concat(&hooks);
        self
    }

    pub fn throw_on_http_error(mut self, throw: bool) -> Self {
        self.throw_on_http_error = Some(throw);
        self
    }

    /// External cancellation for the whole call, retry waits included.
    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn get_method(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    pub fn get_prefix_url(&self) -> Option<&str> {
        self.prefix_url.as_deref()
    }

    pub fn get_timeout(&self) -> Option<Timeout> {
        self.timeout
    }

    pub fn get_retry(&self) -> Option<&RetrySpec> {
        self.retry.as_ref()
    }

    pub fn get_search_params(&self) -> Option<&SearchParams> {
        self.search_params.as_ref()
    }

    pub fn get_throw_on_http_error(&self) -> Option<bool> {
        self.throw_on_http_error
    }

    pub fn get_hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Headers as they resolve after applying every write and removal in order.
    pub fn get_headers(&self) -> HeaderMap {
        resolve_headers(&self.headers)
    }

    /// Combine `self` (earlier) with `later`, returning a new partial.
    pub fn merge(&self, later: &Options) -> Options {
        Options {
            method: later.method.clone().or_else(|| self.method.clone()),
            headers: self.headers.iter().chain(&later.headers).cloned().collect(),
            search_params: later.search_params.clone().or_else(|| self.search_params.clone()),
            json: later.json.clone().or_else(|| self.json.clone()),
            body: later.body.clone().or_else(|| self.body.clone()),
            prefix_url: later.prefix_url.clone().or_else(|| self.prefix_url.clone()),
            timeout: later.timeout.or(self.timeout),
            retry: RetrySpec::merge(self.retry.as_ref(), later.retry.as_ref()),
            hooks: self.hooks.concat(&later.hooks),
            throw_on_http_error: later.throw_on_http_error.or(self.throw_on_http_error),
            signal: later.signal.clone().or_else(|| self.signal.clone()),
            invalid: self.invalid.iter().chain(&later.invalid).cloned().collect(),
        }
    }

    /// Validate and resolve every field to a concrete value.
    pub fn normalize(&self) -> Result<NormalizedOptions> {
        if !self.invalid.is_empty() {
            return Err(Error::Configuration(self.invalid.join("; ")));
        }
        if self.json.is_some() && self.body.is_some() {
            return Err(Error::Configuration(
                "`json` and `body` are mutually exclusive".to_string(),
            ));
        }

        let timeout = match self.timeout {
            None => Some(DEFAULT_TIMEOUT),
            Some(Timeout::Disabled) => None,
            Some(Timeout::After(d)) if d.is_zero() || d > MAX_TIMEOUT => {
                return Err(Error::Configuration(format!(
                    "timeout must be between 1ms and {}ms (got {}ms)",
                    MAX_TIMEOUT.as_millis(),
                    d.as_millis()
                )));
            }
            Some(Timeout::After(d)) => Some(d),
        };

        let body = match (&self.json, &self.body) {
            (Some(Ok(value)), _) => RequestBody::Json(value.clone()),
            (Some(Err(e)), _) => {
                return Err(Error::RequestBuild(format!("json payload is not serializable: {e}")))
            }
            (None, Some(body)) => body.clone(),
            (None, None) => RequestBody::Empty,
        };

        let prefix_url = self.prefix_url.as_ref().filter(|p| !p.is_empty()).map(|p| {
            if p.ends_with('/') {
                p.clone()
            } else {
                format!("{p}/")
            }
        });

        Ok(NormalizedOptions {
            method: self.method.clone().unwrap_or(Method::GET),
            headers: resolve_headers(&self.headers),
            search_params: self.search_params.clone(),
            body,
            prefix_url,
            retry: self.retry.as_ref().map(RetrySpec::resolve).unwrap_or_default(),
            timeout,
            hooks: self.hooks.clone(),
            throw_on_http_error: self.throw_on_http_error.unwrap_or(true),
            signal: self.signal.clone(),
        })
    }
}

/// Fully merged configuration for one call. Immutable once built.
#[derive(Debug, Clone)]
pub struct NormalizedOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub search_params: Option<SearchParams>,
    pub body: RequestBody,
    /// Always ends with `/` when set.
    pub prefix_url: Option<String>,
    pub retry: RetryPolicy,
    /// `None` when disabled.
    pub timeout: Option<Duration>,
    pub hooks: Hooks,
    pub throw_on_http_error: bool,
    pub signal: Option<AbortSignal>,
}

impl Default for NormalizedOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            search_params: None,
            body: RequestBody::Empty,
            prefix_url: None,
            retry: RetryPolicy::default(),
            timeout: Some(DEFAULT_TIMEOUT),
            hooks: Hooks::new(),
            throw_on_http_error: true,
            signal: None,
        }
    }
}

/// Merge `partials` left-to-right and normalize the result.
pub fn merge<'a, I>(partials: I) -> Result<NormalizedOptions>
where
    I: IntoIterator<Item = &'a Options>,
{
    partials.into_iter().fold(Options::new(), |acc, next| acc.merge(next)).normalize()
}

fn resolve_headers(writes: &[(HeaderName, Option<HeaderValue>)]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in writes {
        match value {
            Some(value) => {
                headers.insert(name.clone(), value.clone());
            }
            None => {
                headers.remove(name);
            }
        }
    }
    headers
}
