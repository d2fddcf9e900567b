//! Retry policy and per-attempt retry decisions.
//!
//! Semantics:
//! - `limit` counts retries, not attempts: a limit of 2 allows three attempts in total.
//! - Only methods in `methods` are retried. The default set holds the idempotent methods
//!   (GET, PUT, HEAD, DELETE, OPTIONS, TRACE); POST and PATCH must be opted in.
//! - A failed attempt is retried when its [`ErrorCode`] is in `error_codes`; a non-ok response
//!   is retried when its status is in `status_codes`. Ok responses are never retried.
//! - A server retry-after directive (`Retry-After`, or the rate-limit reset headers) replaces the
//!   computed delay and is capped by `max_retry_after`, falling back to `backoff_limit`.
//! - A 413 is retried only when the server said when to come back.
//! - Computed delays come from `delay`, randomised by `jitter`, then capped by `backoff_limit`.
//! - `max_elapsed` stops retrying once the next wait would cross the budget.
//!
//! Decisions are pure: [`RetryPolicy::decide`] takes the current wall-clock time as an argument
//! so tests can pin it.
//!
//! ```rust
//! use ninefetch::{RetryPolicy, Backoff};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::default()
//!     .limit(4)
//!     .status_codes([429, 503])
//!     .delay(Backoff::constant(Duration::from_millis(250)))
//!     .max_retry_after(Duration::from_secs(30));
//! assert_eq!(policy.get_limit(), 4);
//! ```

use crate::backoff::Backoff;
use crate::error::ErrorCode;
use crate::jitter::Jitter;
use crate::response::Response;
use http::header::{HeaderMap, HeaderName, RETRY_AFTER};
use http::{Method, StatusCode};
use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Retries allowed when options do not say otherwise.
pub const DEFAULT_RETRY_LIMIT: u32 = 2;

/// Statuses retried by default.
pub const DEFAULT_RETRY_STATUS_CODES: [u16; 7] = [408, 413, 429, 500, 502, 503, 504];

/// Reset headers consulted, in order, when `Retry-After` is absent.
const RATE_LIMIT_RESET_HEADERS: [&str; 3] =
    ["ratelimit-reset", "x-ratelimit-reset", "x-rate-limit-reset"];

/// Numeric reset values at or above this (2024-01-01T00:00:00Z) are epoch timestamps, not deltas.
const EPOCH_TIMESTAMP_THRESHOLD: u64 = 1_704_067_200;

fn default_methods() -> Vec<Method> {
    vec![Method::GET, Method::PUT, Method::HEAD, Method::DELETE, Method::OPTIONS, Method::TRACE]
}

/// Canonical retry configuration.
#[derive(Clone)]
pub struct RetryPolicy {
    limit: u32,
    methods: Vec<Method>,
    status_codes: BTreeSet<u16>,
    error_codes: BTreeSet<ErrorCode>,
    delay: Backoff,
    backoff_limit: Option<Duration>,
    max_retry_after: Option<Duration>,
    max_elapsed: Option<Duration>,
    jitter: Jitter,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("limit", &self.limit)
            .field("methods", &self.methods)
            .field("status_codes", &self.status_codes)
            .field("error_codes", &self.error_codes)
            .field("delay", &self.delay)
            .field("backoff_limit", &self.backoff_limit)
            .field("max_retry_after", &self.max_retry_after)
            .field("max_elapsed", &self.max_elapsed)
            .field("jitter", &self.jitter)
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: DEFAULT_RETRY_LIMIT,
            methods: default_methods(),
            status_codes: DEFAULT_RETRY_STATUS_CODES.into_iter().collect(),
            error_codes: ErrorCode::ALL.into_iter().collect(),
            delay: Backoff::default(),
            backoff_limit: None,
            max_retry_after: None,
            max_elapsed: None,
            jitter: Jitter::None,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self::default().limit(0)
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn methods<I: IntoIterator<Item = Method>>(mut self, methods: I) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    pub fn status_codes<I: IntoIterator<Item = u16>>(mut self, codes: I) -> Self {
        self.status_codes = codes.into_iter().collect();
        self
    }

    pub fn error_codes<I: IntoIterator<Item = ErrorCode>>(mut self, codes: I) -> Self {
        self.error_codes = codes.into_iter().collect();
        self
    }

    pub fn delay(mut self, delay: Backoff) -> Self {
        self.delay = delay;
        self
    }

    /// Upper bound for computed delays.
    pub fn backoff_limit(mut self, limit: Duration) -> Self {
        self.backoff_limit = Some(limit);
        self
    }

    /// Upper bound for server-provided retry-after delays.
    pub fn max_retry_after(mut self, max: Duration) -> Self {
        self.max_retry_after = Some(max);
        self
    }

    /// Total time budget across attempts and waits.
    pub fn max_elapsed(mut self, budget: Duration) -> Self {
        self.max_elapsed = Some(budget);
        self
    }

    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn get_limit(&self) -> u32 {
        self.limit
    }

    pub fn get_methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn get_status_codes(&self) -> &BTreeSet<u16> {
        &self.status_codes
    }

    pub fn get_error_codes(&self) -> &BTreeSet<ErrorCode> {
        &self.error_codes
    }

    pub fn get_delay(&self) -> &Backoff {
        &self.delay
    }

    pub fn get_backoff_limit(&self) -> Option<Duration> {
        self.backoff_limit
    }

    pub fn get_max_retry_after(&self) -> Option<Duration> {
        self.max_retry_after
    }

    pub fn get_max_elapsed(&self) -> Option<Duration> {
        self.max_elapsed
    }

    pub fn get_jitter(&self) -> Jitter {
        self.jitter
    }

    /// Decide whether the attempt that produced `observed` should be retried.
    ///
    /// `retry_count` is the number of retries already performed; `elapsed` is the time since the
    /// call started.
    pub fn decide(
        &self,
        observed: Observed<'_>,
        method: &Method,
        retry_count: u32,
        elapsed: Duration,
        now: SystemTime,
    ) -> RetryDecision {
        if !self.methods.contains(method) || retry_count >= self.limit {
            return RetryDecision::stop();
        }

        let delay = match observed {
            Observed::Failure(code) => {
                if !self.error_codes.contains(&code) {
                    return RetryDecision::stop();
                }
                self.computed_delay(retry_count + 1)
            }
            Observed::Response(response) => {
                let status = response.status();
                if status.is_success() || !self.status_codes.contains(&status.as_u16()) {
                    return RetryDecision::stop();
                }
                match retry_after(response.headers(), now) {
                    Some(after) => {
                        let cap = self.max_retry_after.or(self.backoff_limit);
                        cap.map_or(after, |cap| after.min(cap))
                    }
                    None if status == StatusCode::PAYLOAD_TOO_LARGE => {
                        return RetryDecision::stop();
                    }
                    None => self.computed_delay(retry_count + 1),
                }
            }
        };

        if let Some(budget) = self.max_elapsed {
            if elapsed.saturating_add(delay) > budget {
                return RetryDecision::stop();
            }
        }
        RetryDecision::retry_after(delay)
    }

    fn computed_delay(&self, retry: u32) -> Duration {
        let delay = self.jitter.apply(self.delay.delay(retry));
        self.backoff_limit.map_or(delay, |limit| delay.min(limit))
    }
}

/// Retry configuration as written in options: a bare limit or a full policy.
#[derive(Debug, Clone)]
pub enum RetrySpec {
    Limit(u32),
    Policy(RetryPolicy),
}

impl RetrySpec {
    /// Combine an inherited retry setting with a later one. A bare limit updates the inherited
    /// policy's limit; a full policy replaces whatever came before.
    pub fn merge(earlier: Option<&RetrySpec>, later: Option<&RetrySpec>) -> Option<RetrySpec> {
        match (earlier, later) {
            (earlier, None) => earlier.cloned(),
            (Some(RetrySpec::Policy(policy)), Some(RetrySpec::Limit(limit))) => {
                Some(RetrySpec::Policy(policy.clone().limit(*limit)))
            }
            (_, Some(later)) => Some(later.clone()),
        }
    }

    pub fn resolve(&self) -> RetryPolicy {
        match self {
            RetrySpec::Limit(limit) => RetryPolicy::default().limit(*limit),
            RetrySpec::Policy(policy) => policy.clone(),
        }
    }
}

impl From<u32> for RetrySpec {
    fn from(limit: u32) -> Self {
        RetrySpec::Limit(limit)
    }
}

impl From<RetryPolicy> for RetrySpec {
    fn from(policy: RetryPolicy) -> Self {
        RetrySpec::Policy(policy)
    }
}

/// What an attempt produced, as far as the retry decision is concerned.
#[derive(Debug, Clone, Copy)]
pub enum Observed<'a> {
    /// The transport failed or the attempt timed out.
    Failure(ErrorCode),
    Response(&'a Response),
}

/// Outcome of [`RetryPolicy::decide`]. Recomputed per attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub delay: Duration,
}

impl RetryDecision {
    pub fn stop() -> Self {
        Self { should_retry: false, delay: Duration::ZERO }
    }

    pub fn retry_after(delay: Duration) -> Self {
        Self { should_retry: true, delay }
    }
}

/// Server-requested wait, from `Retry-After` or the rate-limit reset headers.
///
/// Accepts delta seconds or an HTTP-date; reset headers may also carry an epoch timestamp.
/// Dates in the past yield zero. A value that does not parse, or names an instant the clock
/// cannot represent, is ignored.
pub fn retry_after(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
    let direct = header_str(headers, &RETRY_AFTER).and_then(|raw| parse_retry_after(raw, now));
    if direct.is_some() {
        return direct;
    }
    RATE_LIMIT_RESET_HEADERS.into_iter().find_map(|name| {
        let raw = header_str(headers, &HeaderName::from_static(name))?;
        parse_retry_after(raw, now)
    })
}

fn header_str<'h>(headers: &'h HeaderMap, name: &HeaderName) -> Option<&'h str> {
    headers.get(name)?.to_str().ok().map(str::trim)
}

fn parse_retry_after(raw: &str, now: SystemTime) -> Option<Duration> {
    if let Ok(seconds) = raw.parse::<u64>() {
        if seconds < EPOCH_TIMESTAMP_THRESHOLD {
            return Some(Duration::from_secs(seconds));
        }
        let at = UNIX_EPOCH.checked_add(Duration::from_secs(seconds))?;
        return Some(at.duration_since(now).unwrap_or(Duration::ZERO));
    }
    let date = httpdate::parse_http_date(raw).ok()?;
    Some(date.duration_since(now).unwrap_or(Duration::ZERO))
}
