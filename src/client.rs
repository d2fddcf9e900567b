//! The client factory.
//!
//! A [`Client`] holds a fetch capability and an immutable set of default [`Options`]. Every call
//! merges three partials, in order: the method of a [`Request`](crate::Request) input, the
//! client defaults, and the per-call options. Shorthands (`get`, `post`, ...) set the method on
//! top of all three.
//!
//! [`Client::extend`] derives a child that inherits the defaults (hooks concatenate, parent
//! first); [`Client::create`] derives a fresh one that shares only the transport.
//!
//! ```rust
//! use ninefetch::{fetch_fn, Client, Options, Response};
//! use http::StatusCode;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let client = Client::new(fetch_fn(|_request, _signal| async {
//!     Ok(Response::new(StatusCode::OK).with_body(r#"{"ok":true}"#))
//! }))
//! .extend(Options::new().prefix_url("https://api.example.com/v1"));
//!
//! let body: serde_json::Value = client.get("status", Options::new()).json().await.unwrap();
//! assert_eq!(body["ok"], true);
//! # });
//! ```

use crate::clock::{Clock, MonotonicClock};
use crate::execution::Execution;
use crate::fetch::Fetch;
use crate::hooks::HookAction;
use crate::options::{self, Options};
use crate::request::Input;
use crate::response::LazyResponse;
use crate::sleeper::{Sleeper, TokioSleeper};
use http::Method;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

/// HTTP client over an injected fetch capability. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    fetch: Arc<dyn Fetch>,
    defaults: Arc<Options>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("defaults", &self.defaults)
            .field("sleeper", &self.sleeper)
            .field("clock", &self.clock)
            .field("fetch", &"<fetch>")
            .finish()
    }
}

impl Client {
    /// Returned from a `before_retry` hook to end the call with no response.
    pub const STOP: HookAction<Infallible> = HookAction::Stop;

    pub fn new<F: Fetch + 'static>(fetch: F) -> Self {
        Self::from_shared(Arc::new(fetch))
    }

    pub fn from_shared(fetch: Arc<dyn Fetch>) -> Self {
        Self {
            fetch,
            defaults: Arc::new(Options::new()),
            sleeper: Arc::new(TokioSleeper),
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Replace the defaults outright.
    pub fn with_defaults(mut self, defaults: Options) -> Self {
        self.defaults = Arc::new(defaults);
        self
    }

    /// Swap how retry waits are performed (tests use `InstantSleeper` or `TrackingSleeper`).
    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn defaults(&self) -> &Options {
        &self.defaults
    }

    /// The stop sentinel, for hooks that capture the client.
    pub fn stop(&self) -> HookAction<Infallible> {
        Self::STOP
    }

    /// Start a call. Nothing is sent until the returned [`LazyResponse`] is awaited or read.
    ///
    /// Invalid options do not panic here; they surface as [`Error::Configuration`](crate::Error)
    /// from the lazy response.
    pub fn request(&self, input: impl Into<Input>, options: Options) -> LazyResponse {
        let input = input.into();
        let base = match input.method() {
            Some(method) => Options::new().method(method.clone()),
            None => Options::new(),
        };
        let normalized = options::merge([&base, self.defaults.as_ref(), &options]);
        LazyResponse::new(Execution::new(
            self.fetch.clone(),
            input,
            normalized,
            self.sleeper.clone(),
            self.clock.clone(),
        ))
    }

    pub fn get(&self, input: impl Into<Input>, options: Options) -> LazyResponse {
        self.request(input, options.method(Method::GET))
    }

    pub fn post(&self, input: impl Into<Input>, options: Options) -> LazyResponse {
        self.request(input, options.method(Method::POST))
    }

    pub fn put(&self, input: impl Into<Input>, options: Options) -> LazyResponse {
        self.request(input, options.method(Method::PUT))
    }

    pub fn patch(&self, input: impl Into<Input>, options: Options) -> LazyResponse {
        self.request(input, options.method(Method::PATCH))
    }

    pub fn delete(&self, input: impl Into<Input>, options: Options) -> LazyResponse {
        self.request(input, options.method(Method::DELETE))
    }

    pub fn head(&self, input: impl Into<Input>, options: Options) -> LazyResponse {
        self.request(input, options.method(Method::HEAD))
    }

    /// A client with `defaults` and nothing inherited but the transport, sleeper and clock.
    pub fn create(&self, defaults: Options) -> Client {
        Client { defaults: Arc::new(defaults), ..self.clone() }
    }

    /// A child client whose defaults are this client's merged with `defaults`.
    pub fn extend(&self, defaults: Options) -> Client {
        Client { defaults: Arc::new(self.defaults.merge(&defaults)), ..self.clone() }
    }

    /// Like [`Client::extend`], with the child's options computed from this client's defaults.
    /// The result is merged onto the parent defaults, so hooks still concatenate.
    pub fn extend_with<F>(&self, f: F) -> Client
    where
        F: FnOnce(&Options) -> Options,
    {
        let child = f(&self.defaults);
        Client { defaults: Arc::new(self.defaults.merge(&child)), ..self.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::fetch_fn;
    use crate::hooks::Hooks;
    use crate::request::Request;
    use crate::response::Response;
    use crate::sleeper::TrackingSleeper;
    use http::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use url::Url;

    /// Client whose transport records every request it sees and answers 200.
    fn recording() -> (Client, Arc<Mutex<Vec<Request>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let client = Client::new(fetch_fn(move |request: Request, _signal| {
            sink.lock().unwrap().push(request);
            async { Ok(Response::new(StatusCode::OK)) }
        }))
        .with_sleeper(TrackingSleeper::new());
        (client, seen)
    }

    #[tokio::test]
    async fn shorthands_set_method_last() {
        let (client, seen) = recording();
        let client = client.extend(Options::new().method(Method::PUT));

        client.post("https://c.test/a", Options::new().method(Method::GET)).send().await.unwrap();
        client.request("https://c.test/b", Options::new()).send().await.unwrap();

        let methods: Vec<_> = seen.lock().unwrap().iter().map(|r| r.method().clone()).collect();
        assert_eq!(methods, vec![Method::POST, Method::PUT]);
    }

    #[tokio::test]
    async fn request_input_method_is_the_base() {
        let (client, seen) = recording();
        let input = Request::new(Method::DELETE, Url::parse("https://c.test/x").unwrap());

        client.request(input, Options::new()).send().await.unwrap();

        assert_eq!(seen.lock().unwrap()[0].method(), Method::DELETE);
    }

    #[tokio::test]
    async fn extend_inherits_and_create_does_not() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let hook = |label: &'static str| {
            let order = order.clone();
            Hooks::new().before_request(move |_ctx| {
                let order = order.clone();
                Box::pin(async move {
                    order.lock().unwrap().push(label);
                    Ok(HookAction::Continue)
                })
            })
        };
        let (root, seen) = recording();
        let parent = root.extend(
            Options::new().prefix_url("https://parent.test/api").hooks(hook("parent")),
        );
        let child = parent.extend(Options::new().hooks(hook("child")));
        let fresh = parent.create(Options::new().prefix_url("https://fresh.test"));

        child.get("items", Options::new()).send().await.unwrap();
        fresh.get("items", Options::new()).send().await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["parent", "child"]);
        let urls: Vec<_> = seen.lock().unwrap().iter().map(|r| r.url().to_string()).collect();
        assert_eq!(urls, vec!["https://parent.test/api/items", "https://fresh.test/items"]);
    }

    #[tokio::test]
    async fn extend_with_sees_parent_defaults() {
        let (client, seen) = recording();
        let parent = client.extend(Options::new().header("x-team", "core"));
        let child = parent.extend_with(|defaults| {
            let team = defaults.get_headers()["x-team"].to_str().unwrap().to_string();
            Options::new().header("x-team", format!("{team}-child"))
        });

        child.get("https://c.test/", Options::new()).send().await.unwrap();

        assert_eq!(seen.lock().unwrap()[0].headers()["x-team"], "core-child");
        assert_eq!(parent.defaults().get_headers()["x-team"], "core");
    }

    #[tokio::test]
    async fn extend_with_keeps_parent_prefix_and_hooks() {
        let parent_runs = Arc::new(AtomicU32::new(0));
        let counter = parent_runs.clone();
        let (root, seen) = recording();
        let parent = root.extend(Options::new().prefix_url("https://p.test/api").hooks(
            Hooks::new().before_request(move |_ctx| {
                counter.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Ok(HookAction::Continue) })
            }),
        ));
        let child = parent.extend_with(|_| Options::new().header("x-child", "1"));

        child.get("users", Options::new()).send().await.unwrap();

        let requests = seen.lock().unwrap();
        assert_eq!(requests[0].url().as_str(), "https://p.test/api/users");
        assert_eq!(requests[0].headers()["x-child"], "1");
        assert_eq!(parent_runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_options_surface_lazily() {
        let (client, seen) = recording();

        let response = client.get("https://c.test/", Options::new().header("bad name", "v"));

        assert!(response.send().await.unwrap_err().is_configuration());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn stop_sentinel() {
        let (client, _) = recording();
        assert!(client.stop().is_stop());
        assert!(Client::STOP.is_stop());
    }
}
