#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # ninefetch
//!
//! A small HTTP client core built over an injected fetch capability: option merging, request
//! building, timeouts and cancellation, lifecycle hooks, retries with backoff, and lazy body
//! reads.
//!
//! ## Features
//!
//! - **Layered options**: parent defaults, instance defaults and per-call overrides merge with
//!   field-specific rules; hooks concatenate so parents always run first
//! - **Retry engine** honouring `Retry-After`, with exponential backoff, caps and jitter
//! - **Per-attempt timeouts** composed with caller cancellation into one signal
//! - **Hooks** at `before_request`, `after_response`, `before_retry` and `before_error`, plus
//!   `before_return` to map the outcome to a typed value
//! - **Lazy responses**: one execution shared by every body read, single-use bodies
//! - **Pluggable transport**: closures, tower services, or `reqwest` behind a feature flag
//!
//! ## Quick Start
//!
//! ```rust
//! use ninefetch::{fetch_fn, Client, Options, Response, RetryPolicy};
//! use http::StatusCode;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = Client::new(fetch_fn(|_request, _signal| async {
//!         Ok(Response::new(StatusCode::OK).with_body("pong"))
//!     }));
//!
//!     let text = client
//!         .get(
//!             "https://example.com/ping",
//!             Options::new()
//!                 .timeout(Duration::from_secs(2))
//!                 .retry(RetryPolicy::default().limit(3)),
//!         )
//!         .text()
//!         .await
//!         .unwrap();
//!     assert_eq!(text, "pong");
//! }
//! ```

pub mod backoff;
pub mod client;
pub mod clock;
pub mod error;
mod execution;
pub mod fetch;
pub mod hooks;
pub mod jitter;
pub mod options;
pub mod prelude;
pub mod request;
pub mod response;
pub mod retry;
pub mod signal;
pub mod sleeper;
pub mod timeout;

// Re-exports
pub use backoff::{Backoff, BackoffError, MAX_BACKOFF};
pub use client::Client;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{Error, ErrorCode, FetchError, HttpError, Result, TimeoutError};
#[cfg(feature = "reqwest")]
pub use fetch::ReqwestFetch;
pub use fetch::{fetch_fn, Fetch, FnFetch, ServiceFetch};
pub use hooks::{
    AfterResponseContext, BeforeErrorContext, BeforeRequestContext, BeforeRetryContext,
    BeforeReturnContext, HookAction, HookPoint, HookResult, Hooks,
};
pub use jitter::Jitter;
pub use options::{merge, NormalizedOptions, Options, RequestBody, SearchParams};
pub use request::{Input, PreparedRequest, Request};
pub use response::{BodyKind, LazyResponse, Response};
pub use retry::{RetryDecision, RetryPolicy, RetrySpec};
pub use signal::{AbortController, AbortReason, AbortSignal};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use timeout::{compose_signal, ComposedSignal, Timeout, DEFAULT_TIMEOUT, MAX_TIMEOUT};
