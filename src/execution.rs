//! The per-call state machine.
//!
//! ```text
//! BUILD -> DISPATCH -> (SHORT_CIRCUIT | AWAIT_RESULT) -> EVALUATE
//!       -> SUCCESS | RETRY_WAIT -> BUILD | FAIL
//! ```
//!
//! One [`Execution`] drives one logical call: it builds the request for each attempt, runs
//! `before_request` hooks, races the fetch against the attempt's composed signal, asks the retry
//! policy what to do with failures, and runs `before_retry`, `after_response` and `before_error`
//! hooks at their lifecycle points. Every step of one call is sequential; nothing inside it runs
//! in parallel.
//!
//! Terminal outcomes:
//! - `Ok(Some(response))`: success, after `after_response` hooks.
//! - `Ok(None)`: a `before_retry` hook returned [`HookAction::Stop`](crate::HookAction::Stop).
//! - `Err(error)`: the error after `before_error` hooks had their pass.

use crate::clock::Clock;
use crate::error::{Error, ErrorCode};
use crate::fetch::Fetch;
use crate::hooks::{self, RetryGate};
use crate::options::NormalizedOptions;
use crate::request::{Input, PreparedRequest, Request};
use crate::response::{BodyKind, Response};
use crate::retry::Observed;
use crate::signal::{AbortReason, AbortSignal};
use crate::sleeper::{self, Sleeper};
use crate::timeout::compose_signal;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;

/// What one attempt produced before the retry policy looked at it.
enum Attempt {
    Responded(Response),
    /// Retryable if the policy allows.
    Failed(Error),
    /// Never retried.
    Fatal(Error),
}

/// Where EVALUATE sends the call.
enum Next {
    Succeed(Response),
    Retry { error: Error, delay: Duration },
    Fail(Error),
}

/// Everything one call needs. Cheap to share; [`Execution::run`] never mutates it.
pub(crate) struct Execution {
    fetch: Arc<dyn Fetch>,
    input: Input,
    options: Result<Arc<NormalizedOptions>>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
}

impl Execution {
    pub(crate) fn new(
        fetch: Arc<dyn Fetch>,
        input: Input,
        options: Result<NormalizedOptions>,
        sleeper: Arc<dyn Sleeper>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { fetch, input, options: options.map(Arc::new), sleeper, clock }
    }

    /// The merged options, or the error that made them unusable.
    pub(crate) fn options(&self) -> Result<Arc<NormalizedOptions>> {
        self.options.clone()
    }

    /// Run the call to a terminal outcome. `accept` is the body representation the caller is
    /// about to read, if any.
    pub(crate) async fn run(&self, accept: Option<BodyKind>) -> Result<Option<Response>> {
        let options = self.options.clone()?;

        let mut prepared = match PreparedRequest::new(&self.input, &options) {
            Ok(prepared) => prepared,
            Err(error) => return Err(self.fail(&options, None, error, 0).await),
        };
        if let Some(kind) = accept {
            prepared.accept(kind);
        }

        let caller = options.signal.clone().unwrap_or_default();
        let started = self.clock.now_millis();
        let mut retry_count = 0u32;

        loop {
            let mut request = prepared.build(retry_count);

            let attempt =
                match hooks::run_before_request(&options, &mut request, retry_count).await {
                    Ok(Some(response)) => {
                        tracing::debug!(
                            method = %request.method(),
                            url = %request.url(),
                            attempt = retry_count,
                            status = response.status().as_u16(),
                            "before_request hook short-circuited the fetch"
                        );
                        Attempt::Responded(response)
                    }
                    Ok(None) => self.dispatch(&options, &request, retry_count).await,
                    Err(error) => Attempt::Fatal(error),
                };

            let elapsed = Duration::from_millis(self.clock.now_millis().saturating_sub(started));
            let next = self.evaluate(&options, &request, attempt, retry_count, elapsed);
            let (error, delay) = match next {
                Next::Succeed(response) => {
                    return match hooks::run_after_response(
                        &options,
                        &request,
                        response,
                        retry_count,
                    )
                    .await
                    {
                        Ok(response) => {
                            tracing::debug!(
                                method = %request.method(),
                                url = %request.url(),
                                attempt = retry_count,
                                status = response.status().as_u16(),
                                "request succeeded"
                            );
                            Ok(Some(response))
                        }
                        Err(error) => {
                            Err(self.fail(&options, Some(&request), error, retry_count).await)
                        }
                    };
                }
                Next::Fail(error) => {
                    return Err(self.fail(&options, Some(&request), error, retry_count).await);
                }
                Next::Retry { error, delay } => (error, delay),
            };

            retry_count += 1;
            tracing::warn!(
                method = %request.method(),
                url = %request.url(),
                attempt = retry_count,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "retrying request"
            );

            match hooks::run_before_retry(&options, prepared.request_mut(), &error, retry_count)
                .await
            {
                Ok(RetryGate::Proceed) => {}
                Ok(RetryGate::Stop) => {
                    tracing::info!(
                        method = %request.method(),
                        url = %request.url(),
                        retry_count,
                        "before_retry hook stopped the call"
                    );
                    return Ok(None);
                }
                Err(error) => {
                    return Err(self.fail(&options, Some(&request), error, retry_count).await);
                }
            }

            if sleeper::sleep_unless_aborted(self.sleeper.as_ref(), delay, &caller).await.is_err()
            {
                let error = Error::cancelled(&request);
                return Err(self.fail(&options, Some(&request), error, retry_count).await);
            }
        }
    }

    /// AWAIT_RESULT: race the fetch against the attempt's composed signal.
    async fn dispatch(
        &self,
        options: &NormalizedOptions,
        request: &Request,
        attempt: u32,
    ) -> Attempt {
        tracing::debug!(
            method = %request.method(),
            url = %request.url(),
            attempt,
            "dispatching request"
        );
        let composed = compose_signal(options.signal.as_ref(), options.timeout);
        let signal: AbortSignal = composed.signal().clone();

        let attempt = tokio::select! {
            biased;
            reason = signal.aborted() => match reason {
                AbortReason::Timeout => Attempt::Failed(Error::timeout(
                    request.clone(),
                    options.timeout.unwrap_or_default(),
                )),
                AbortReason::Cancelled => Attempt::Fatal(Error::cancelled(request)),
            },
            result = self.fetch.fetch(request.clone(), signal.clone()) => match result {
                Ok(response) => Attempt::Responded(response),
                Err(error) => Attempt::Failed(Error::Network(error)),
            },
        };

        composed.dispose();
        attempt
    }

    /// EVALUATE: classify the attempt and consult the retry policy.
    fn evaluate(
        &self,
        options: &NormalizedOptions,
        request: &Request,
        attempt: Attempt,
        retry_count: u32,
        elapsed: Duration,
    ) -> Next {
        let policy = &options.retry;
        let now = self.clock.wall_time();
        match attempt {
            Attempt::Responded(response) if response.is_ok() => Next::Succeed(response),
            Attempt::Responded(response) => {
                let decision = policy.decide(
                    Observed::Response(&response),
                    request.method(),
                    retry_count,
                    elapsed,
                    now,
                );
                if decision.should_retry {
                    let error = Error::http(request.clone(), response);
                    Next::Retry { error, delay: decision.delay }
                } else if options.throw_on_http_error {
                    Next::Fail(Error::http(request.clone(), response))
                } else {
                    Next::Succeed(response)
                }
            }
            Attempt::Failed(error) => {
                let code = error.code().unwrap_or(ErrorCode::Other);
                let observed = Observed::Failure(code);
                let decision = policy.decide(observed, request.method(), retry_count, elapsed, now);
                if decision.should_retry {
                    Next::Retry { error, delay: decision.delay }
                } else {
                    Next::Fail(error)
                }
            }
            Attempt::Fatal(error) => Next::Fail(error),
        }
    }

    /// FAIL: give `before_error` hooks their pass and log the outcome.
    async fn fail(
        &self,
        options: &NormalizedOptions,
        request: Option<&Request>,
        error: Error,
        retry_count: u32,
    ) -> Error {
        let error = hooks::run_before_error(options, request, error, retry_count).await;
        tracing::warn!(
            method = ?request.map(Request::method),
            url = ?request.map(|r| r.url().as_str()),
            retry_count,
            error = %error,
            "request failed"
        );
        error
    }
}
