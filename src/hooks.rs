//! Lifecycle hooks.
//!
//! Hooks are async callables registered per lifecycle point. Every hook returns a
//! [`HookAction`], and one interpreter decides what that action means at each point:
//!
//! | point            | `Continue` | `Replace(v)`                              | `Stop`          |
//! |------------------|------------|-------------------------------------------|-----------------|
//! | `before_request` | next hook  | `v` is the attempt's response, no fetch   | skip the rest   |
//! | `after_response` | next hook  | `v` replaces the response for later hooks | skip the rest   |
//! | `before_retry`   | next hook  | (uninhabited)                             | halt retrying   |
//! | `before_error`   | next hook  | `v` replaces the error for later hooks    | skip the rest   |
//! | `before_return`  | next hook  | `v` is the value returned to the caller   | skip the rest   |
//!
//! Hooks of one point run strictly in order, each awaited before the next starts. A hook that
//! returns `Err` aborts the call with that error.
//!
//! `before_return` hooks only run for [`LazyResponse::returning`](crate::LazyResponse::returning).
//! They map the terminal outcome to a JSON value; each sees the value the previous one produced.
//!
//! ```rust
//! use ninefetch::{HookAction, Hooks};
//!
//! let hooks = Hooks::new().before_request(|ctx| {
//!     Box::pin(async move {
//!         ctx.request.headers_mut().insert("x-trace", "1".parse().unwrap());
//!         Ok(HookAction::Continue)
//!     })
//! });
//! assert_eq!(hooks.count(ninefetch::HookPoint::BeforeRequest), 1);
//! ```

use crate::options::NormalizedOptions;
use crate::request::Request;
use crate::response::Response;
use crate::{Error, Result};
use futures::future::BoxFuture;
use serde_json::Value;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

/// What a hook asks the pipeline to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookAction<T> {
    Continue,
    Replace(T),
    /// The stop sentinel. Meaningful for `before_retry`; elsewhere it only ends the point early.
    Stop,
}

impl<T> HookAction<T> {
    pub fn is_stop(&self) -> bool {
        matches!(self, HookAction::Stop)
    }
}

pub type HookResult<T> = Result<HookAction<T>>;

/// Lifecycle points, in the order a call can reach them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    BeforeRequest,
    AfterResponse,
    BeforeRetry,
    BeforeError,
    BeforeReturn,
}

/// Passed to `before_request` hooks. Mutations apply to the current attempt only.
pub struct BeforeRequestContext<'a> {
    pub request: &'a mut Request,
    pub options: &'a NormalizedOptions,
    pub retry_count: u32,
}

/// Passed to `after_response` hooks.
pub struct AfterResponseContext<'a> {
    pub request: &'a Request,
    pub options: &'a NormalizedOptions,
    pub response: &'a Response,
    pub retry_count: u32,
}

/// Passed to `before_retry` hooks. Mutations to `request` carry over to every later attempt.
pub struct BeforeRetryContext<'a> {
    pub request: &'a mut Request,
    pub options: &'a NormalizedOptions,
    pub error: &'a Error,
    /// Number of the retry about to happen (1 for the first retry).
    pub retry_count: u32,
}

/// Passed to `before_error` hooks.
pub struct BeforeErrorContext<'a> {
    /// Absent when the request could not be built.
    pub request: Option<&'a Request>,
    pub options: &'a NormalizedOptions,
    pub error: &'a Error,
    pub retry_count: u32,
}

/// Passed to `before_return` hooks.
pub struct BeforeReturnContext<'a> {
    pub options: &'a NormalizedOptions,
    /// The terminal response. Absent when a `before_retry` hook stopped the call.
    pub response: Option<&'a Response>,
    /// What earlier `before_return` hooks produced, if any did.
    pub value: Option<&'a Value>,
}

type BeforeRequestFn =
    dyn for<'a> Fn(BeforeRequestContext<'a>) -> BoxFuture<'a, HookResult<Response>> + Send + Sync;
type AfterResponseFn =
    dyn for<'a> Fn(AfterResponseContext<'a>) -> BoxFuture<'a, HookResult<Response>> + Send + Sync;
type BeforeRetryFn =
    dyn for<'a> Fn(BeforeRetryContext<'a>) -> BoxFuture<'a, HookResult<Infallible>> + Send + Sync;
type BeforeErrorFn =
    dyn for<'a> Fn(BeforeErrorContext<'a>) -> BoxFuture<'a, HookResult<Error>> + Send + Sync;
type BeforeReturnFn =
    dyn for<'a> Fn(BeforeReturnContext<'a>) -> BoxFuture<'a, HookResult<Value>> + Send + Sync;

/// Ordered hook lists for every lifecycle point.
#[derive(Clone, Default)]
pub struct Hooks {
    before_request: Vec<Arc<BeforeRequestFn>>,
    after_response: Vec<Arc<AfterResponseFn>>,
    before_retry: Vec<Arc<BeforeRetryFn>>,
    before_error: Vec<Arc<BeforeErrorFn>>,
    before_return: Vec<Arc<BeforeReturnFn>>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before_request", &self.before_request.len())
            .field("after_response", &self.after_response.len())
            .field("before_retry", &self.before_retry.len())
            .field("before_error", &self.before_error.len())
            .field("before_return", &self.before_return.len())
            .finish()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs before every attempt. `Replace(response)` skips the fetch for that attempt.
    pub fn before_request<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(BeforeRequestContext<'a>) -> BoxFuture<'a, HookResult<Response>>
            + Send
            + Sync
            + 'static,
    {
        self.before_request.push(Arc::new(hook));
        self
    }

    /// Runs once on the terminal successful response.
    pub fn after_response<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(AfterResponseContext<'a>) -> BoxFuture<'a, HookResult<Response>>
            + Send
            + Sync
            + 'static,
    {
        self.after_response.push(Arc::new(hook));
        self
    }

    /// Runs before each retry wait. Return [`HookAction::Stop`] to end the call with no response.
    pub fn before_retry<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(BeforeRetryContext<'a>) -> BoxFuture<'a, HookResult<Infallible>>
            + Send
            + Sync
            + 'static,
    {
        self.before_retry.push(Arc::new(hook));
        self
    }

    /// Runs once on the terminal error. `Replace(error)` substitutes what the caller sees.
    pub fn before_error<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(BeforeErrorContext<'a>) -> BoxFuture<'a, HookResult<Error>>
            + Send
            + Sync
            + 'static,
    {
        self.before_error.push(Arc::new(hook));
        self
    }

    /// Maps the terminal outcome to the value [`LazyResponse::returning`] decodes.
    ///
    /// [`LazyResponse::returning`]: crate::LazyResponse::returning
    pub fn before_return<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(BeforeReturnContext<'a>) -> BoxFuture<'a, HookResult<Value>>
            + Send
            + Sync
            + 'static,
    {
        self.before_return.push(Arc::new(hook));
        self
    }

    pub fn count(&self, point: HookPoint) -> usize {
        match point {
            HookPoint::BeforeRequest => self.before_request.len(),
            HookPoint::AfterResponse => self.after_response.len(),
            HookPoint::BeforeRetry => self.before_retry.len(),
            HookPoint::BeforeError => self.before_error.len(),
            HookPoint::BeforeReturn => self.before_return.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.before_request.is_empty()
            && self.after_response.is_empty()
            && self.before_retry.is_empty()
            && self.before_error.is_empty()
            && self.before_return.is_empty()
    }

    /// `self`'s hooks followed by `later`'s, per point.
    pub fn concat(&self, later: &Hooks) -> Hooks {
        fn join<T: ?Sized>(a: &[Arc<T>], b: &[Arc<T>]) -> Vec<Arc<T>> {
            a.iter().chain(b).cloned().collect()
        }
        Hooks {
            before_request: join(&self.before_request, &later.before_request),
            after_response: join(&self.after_response, &later.after_response),
            before_retry: join(&self.before_retry, &later.before_retry),
            before_error: join(&self.before_error, &later.before_error),
            before_return: join(&self.before_return, &later.before_return),
        }
    }
}

enum Step<T> {
    Next,
    Substitute(T),
    ShortCircuit(T),
    Halt,
}

fn interpret<T>(point: HookPoint, action: HookAction<T>) -> Step<T> {
    match action {
        HookAction::Continue => Step::Next,
        HookAction::Replace(value) if point == HookPoint::BeforeRequest => {
            Step::ShortCircuit(value)
        }
        HookAction::Replace(value) => Step::Substitute(value),
        HookAction::Stop => Step::Halt,
    }
}

/// Outcome of the `before_retry` point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryGate {
    Proceed,
    Stop,
}

/// Returns the short-circuit response, if a hook produced one.
pub(crate) async fn run_before_request(
    options: &NormalizedOptions,
    request: &mut Request,
    retry_count: u32,
) -> Result<Option<Response>> {
    for hook in &options.hooks.before_request {
        let action = hook(BeforeRequestContext { request: &mut *request, options, retry_count })
            .await?;
        match interpret(HookPoint::BeforeRequest, action) {
            Step::Next => {}
            Step::ShortCircuit(response) | Step::Substitute(response) => {
                return Ok(Some(response))
            }
            Step::Halt => break,
        }
    }
    Ok(None)
}

pub(crate) async fn run_after_response(
    options: &NormalizedOptions,
    request: &Request,
    mut response: Response,
    retry_count: u32,
) -> Result<Response> {
    for hook in &options.hooks.after_response {
        let action =
            hook(AfterResponseContext { request, options, response: &response, retry_count })
                .await?;
        match interpret(HookPoint::AfterResponse, action) {
            Step::Next => {}
            Step::Substitute(replacement) | Step::ShortCircuit(replacement) => {
                response = replacement
            }
            Step::Halt => break,
        }
    }
    Ok(response)
}

pub(crate) async fn run_before_retry(
    options: &NormalizedOptions,
    request: &mut Request,
    error: &Error,
    retry_count: u32,
) -> Result<RetryGate> {
    for hook in &options.hooks.before_retry {
        let action =
            hook(BeforeRetryContext { request: &mut *request, options, error, retry_count })
                .await?;
        match interpret(HookPoint::BeforeRetry, action) {
            Step::Next => {}
            Step::Halt => return Ok(RetryGate::Stop),
            Step::Substitute(never) | Step::ShortCircuit(never) => match never {},
        }
    }
    Ok(RetryGate::Proceed)
}

/// Hooks get one pass over the terminal error. A hook that fails replaces the error with its own.
pub(crate) async fn run_before_error(
    options: &NormalizedOptions,
    request: Option<&Request>,
    mut error: Error,
    retry_count: u32,
) -> Error {
    for hook in &options.hooks.before_error {
        let action =
            match hook(BeforeErrorContext { request, options, error: &error, retry_count }).await {
                Ok(action) => action,
                Err(hook_error) => return hook_error,
            };
        match interpret(HookPoint::BeforeError, action) {
            Step::Next => {}
            Step::Substitute(replacement) | Step::ShortCircuit(replacement) => error = replacement,
            Step::Halt => break,
        }
    }
    error
}

/// The last value a hook produced, or `None` when every hook continued.
pub(crate) async fn run_before_return(
    options: &NormalizedOptions,
    response: Option<&Response>,
) -> Result<Option<Value>> {
    let mut value = None;
    for hook in &options.hooks.before_return {
        let action = hook(BeforeReturnContext { options, response, value: value.as_ref() }).await?;
        match interpret(HookPoint::BeforeReturn, action) {
            Step::Next => {}
            Step::Substitute(next) | Step::ShortCircuit(next) => value = Some(next),
            Step::Halt => break,
        }
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use http::{Method, StatusCode};
    use std::sync::Mutex;
    use url::Url;

    fn request() -> Request {
        Request::new(Method::GET, Url::parse("https://hooks.test/items").unwrap())
    }

    fn normalized(hooks: Hooks) -> NormalizedOptions {
        Options::new().hooks(hooks).normalize().unwrap()
    }

    #[tokio::test]
    async fn before_request_mutates_and_runs_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let (first, second) = (order.clone(), order.clone());
        let options = normalized(
            Hooks::new()
                .before_request(move |ctx| {
                    let order = first.clone();
                    Box::pin(async move {
                        order.lock().unwrap().push(1);
                        ctx.request.headers_mut().insert("x-step", "one".parse().unwrap());
                        Ok(HookAction::Continue)
                    })
                })
                .before_request(move |ctx| {
                    let order = second.clone();
                    Box::pin(async move {
                        order.lock().unwrap().push(2);
                        assert_eq!(ctx.request.headers()["x-step"], "one");
                        Ok(HookAction::Continue)
                    })
                }),
        );

        let mut req = request();
        let short = run_before_request(&options, &mut req, 0).await.unwrap();

        assert!(short.is_none());
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
        assert_eq!(req.headers()["x-step"], "one");
    }

    #[tokio::test]
    async fn before_request_replace_short_circuits_remaining_hooks() {
        let later_ran = Arc::new(Mutex::new(false));
        let flag = later_ran.clone();
        let options = normalized(
            Hooks::new()
                .before_request(|_ctx| {
                    Box::pin(async { Ok(HookAction::Replace(Response::new(StatusCode::ACCEPTED))) })
                })
                .before_request(move |_ctx| {
                    let flag = flag.clone();
                    Box::pin(async move {
                        *flag.lock().unwrap() = true;
                        Ok(HookAction::Continue)
                    })
                }),
        );

        let short = run_before_request(&options, &mut request(), 0).await.unwrap();

        assert_eq!(short.unwrap().status(), StatusCode::ACCEPTED);
        assert!(!*later_ran.lock().unwrap());
    }

    #[tokio::test]
    async fn after_response_replacement_feeds_next_hook() {
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let options = normalized(
            Hooks::new()
                .after_response(|_ctx| {
                    Box::pin(async { Ok(HookAction::Replace(Response::new(StatusCode::CREATED))) })
                })
                .after_response(move |ctx| {
                    let sink = sink.clone();
                    Box::pin(async move {
                        *sink.lock().unwrap() = Some(ctx.response.status());
                        Ok(HookAction::Continue)
                    })
                }),
        );

        let ok = Response::new(StatusCode::OK);
        let response = run_after_response(&options, &request(), ok, 0).await.unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(*seen.lock().unwrap(), Some(StatusCode::CREATED));
    }

    #[tokio::test]
    async fn before_retry_stop_skips_remaining_hooks() {
        let later_ran = Arc::new(Mutex::new(false));
        let flag = later_ran.clone();
        let options = normalized(
            Hooks::new()
                .before_retry(|_ctx| Box::pin(async { Ok(HookAction::Stop) }))
                .before_retry(move |_ctx| {
                    let flag = flag.clone();
                    Box::pin(async move {
                        *flag.lock().unwrap() = true;
                        Ok(HookAction::Continue)
                    })
                }),
        );

        let error = Error::hook("boom");
        let gate = run_before_retry(&options, &mut request(), &error, 1).await.unwrap();

        assert_eq!(gate, RetryGate::Stop);
        assert!(!*later_ran.lock().unwrap());
    }

    #[tokio::test]
    async fn before_error_threads_replacements() {
        let options = normalized(
            Hooks::new()
                .before_error(|_ctx| {
                    Box::pin(async { Ok(HookAction::Replace(Error::hook("first"))) })
                })
                .before_error(|ctx| {
                    let message = format!("{} then second", ctx.error);
                    Box::pin(async move { Ok(HookAction::Replace(Error::hook(message))) })
                }),
        );

        let error =
            run_before_error(&options, Some(&request()), Error::Configuration("x".into()), 0).await;

        assert_eq!(error.to_string(), "hook failed: hook failed: first then second");
    }

    #[tokio::test]
    async fn failing_hook_aborts_with_its_error() {
        let options = normalized(
            Hooks::new().before_request(|_ctx| Box::pin(async { Err(Error::hook("denied")) })),
        );

        let err = run_before_request(&options, &mut request(), 0).await.unwrap_err();

        assert_eq!(err.to_string(), "hook failed: denied");
    }

    #[tokio::test]
    async fn before_return_threads_values_until_stopped() {
        let options = normalized(
            Hooks::new()
                .before_return(|ctx| {
                    let status = ctx.response.map(|r| r.status().as_u16());
                    Box::pin(async move { Ok(HookAction::Replace(serde_json::json!(status))) })
                })
                .before_return(|ctx| {
                    let doubled = ctx.value.and_then(Value::as_u64).map(|code| code * 2);
                    Box::pin(async move { Ok(HookAction::Replace(serde_json::json!(doubled))) })
                })
                .before_return(|_ctx| Box::pin(async { Ok(HookAction::Stop) }))
                .before_return(|_ctx| {
                    Box::pin(async { Ok(HookAction::Replace(serde_json::json!("unreached"))) })
                }),
        );

        let response = Response::new(StatusCode::CREATED);
        let value = run_before_return(&options, Some(&response)).await.unwrap();

        assert_eq!(value, Some(serde_json::json!(402)));
    }

    #[tokio::test]
    async fn before_return_without_hooks_produces_nothing() {
        let options = normalized(Hooks::new());
        assert_eq!(run_before_return(&options, None).await.unwrap(), None);
    }

    #[test]
    fn concat_keeps_order_and_counts() {
        let a = Hooks::new().before_retry(|_ctx| Box::pin(async { Ok(HookAction::Continue) }));
        let b = Hooks::new()
            .before_retry(|_ctx| Box::pin(async { Ok(HookAction::Stop) }))
            .before_error(|_ctx| Box::pin(async { Ok(HookAction::Continue) }))
            .before_return(|_ctx| Box::pin(async { Ok(HookAction::Continue) }));

        let joined = a.concat(&b);

        assert_eq!(joined.count(HookPoint::BeforeRetry), 2);
        assert_eq!(joined.count(HookPoint::BeforeError), 1);
        assert_eq!(joined.count(HookPoint::BeforeReturn), 1);
        assert!(Hooks::new().is_empty());
        assert!(!joined.is_empty());
    }
}
