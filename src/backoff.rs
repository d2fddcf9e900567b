//! Retry delay functions.
//!
//! A [`Backoff`] maps a retry number to a wait. Retry numbers start at `1` for the first retry;
//! `0` denotes the initial attempt and always yields no delay. The default is exponential with a
//! 300 ms factor, so retries wait 300 ms, 600 ms, 1.2 s and so on.
//!
//! ```rust
//! use std::time::Duration;
//! use ninefetch::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(300))
//!     .with_max(Duration::from_secs(1))
//!     .unwrap();
//! assert_eq!(backoff.delay(0), Duration::ZERO);
//! assert_eq!(backoff.delay(1), Duration::from_millis(300));
//! assert_eq!(backoff.delay(2), Duration::from_millis(600));
//! assert_eq!(backoff.delay(3), Duration::from_secs(1)); // capped
//! ```
//!
//! Computations that would overflow saturate to [`MAX_BACKOFF`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Saturation ceiling for computed delays (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Factor of the default exponential backoff.
pub const DEFAULT_BACKOFF_FACTOR: Duration = Duration::from_millis(300);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffError {
    MaxNotSupported,
    MaxMustBePositive,
    MaxLessThanBase { base: Duration, max: Duration },
}

impl fmt::Display for BackoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffError::MaxNotSupported => {
                write!(f, "with_max is only valid for linear or exponential backoff")
            }
            BackoffError::MaxMustBePositive => write!(f, "max must be greater than zero"),
            BackoffError::MaxLessThanBase { base, max } => {
                write!(f, "max ({:?}) must be >= base ({:?})", max, base)
            }
        }
    }
}

impl std::error::Error for BackoffError {}

type DelayFn = dyn Fn(u32) -> Duration + Send + Sync;

#[derive(Clone)]
enum BackoffKind {
    Constant(Duration),
    Linear { base: Duration, max: Option<Duration> },
    Exponential { base: Duration, max: Option<Duration> },
    Custom(Arc<DelayFn>),
}

/// Delay function for retries.
#[derive(Clone)]
pub struct Backoff {
    kind: BackoffKind,
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            BackoffKind::Constant(d) => f.debug_tuple("Constant").field(d).finish(),
            BackoffKind::Linear { base, max } => {
                f.debug_struct("Linear").field("base", base).field("max", max).finish()
            }
            BackoffKind::Exponential { base, max } => {
                f.debug_struct("Exponential").field("base", base).field("max", max).finish()
            }
            BackoffKind::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(DEFAULT_BACKOFF_FACTOR)
    }
}

impl Backoff {
    pub fn constant(delay: Duration) -> Self {
        Self { kind: BackoffKind::Constant(delay) }
    }

    /// `base * retry`.
    pub fn linear(base: Duration) -> Self {
        Self { kind: BackoffKind::Linear { base, max: None } }
    }

    /// `base * 2^(retry - 1)`.
    pub fn exponential(base: Duration) -> Self {
        Self { kind: BackoffKind::Exponential { base, max: None } }
    }

    /// Caller-supplied delay function, receiving the 1-based retry number.
    pub fn custom<F>(delay: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self { kind: BackoffKind::Custom(Arc::new(delay)) }
    }

    /// Cap a linear or exponential backoff.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        match &mut self.kind {
            BackoffKind::Linear { base, max: existing }
            | BackoffKind::Exponential { base, max: existing } => {
                if max < *base {
                    return Err(BackoffError::MaxLessThanBase { base: *base, max });
                }
                *existing = Some(max);
                Ok(self)
            }
            BackoffKind::Constant(_) | BackoffKind::Custom(_) => {
                Err(BackoffError::MaxNotSupported)
            }
        }
    }

    /// Delay before retry number `retry`.
    pub fn delay(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let (raw, max) = match &self.kind {
            BackoffKind::Constant(d) => (*d, None),
            BackoffKind::Linear { base, max } => {
                (base.checked_mul(retry).unwrap_or(MAX_BACKOFF), *max)
            }
            BackoffKind::Exponential { base, max } => {
                let multiplier = 2u128.saturating_pow(retry - 1);
                let nanos = base.as_nanos().saturating_mul(multiplier).min(MAX_BACKOFF.as_nanos());
                (Duration::from_nanos(nanos as u64), *max)
            }
            BackoffKind::Custom(f) => (f(retry), None),
        };
        max.map_or(raw, |m| raw.min(m)).min(MAX_BACKOFF)
    }
}
