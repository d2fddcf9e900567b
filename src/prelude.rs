//! Convenient re-exports for everyday ninefetch use.
pub use crate::{
    backoff::Backoff,
    client::Client,
    error::{Error, ErrorCode, FetchError, Result},
    fetch::{fetch_fn, Fetch},
    hooks::{HookAction, Hooks},
    jitter::Jitter,
    options::Options,
    request::Request,
    response::{LazyResponse, Response},
    retry::RetryPolicy,
    signal::{AbortController, AbortSignal},
};
