//! Timeout composition.
//!
//! [`compose_signal`] merges an optional caller signal with an optional per-attempt timeout into
//! one effective [`AbortSignal`]. The timer is a spawned tokio task that listens on both sources
//! and fires the derived signal exactly once; the returned [`ComposedSignal`] owns that task and
//! aborts it when disposed or dropped, so no timer outlives its attempt.

use crate::signal::{AbortController, AbortReason, AbortSignal};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Largest accepted timeout (the 32-bit signed millisecond range most timer APIs accept).
pub const MAX_TIMEOUT: Duration = Duration::from_millis(2_147_483_647);

/// Per-attempt timeout applied when options do not configure one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout setting as written in options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    After(Duration),
    Disabled,
}

impl Timeout {
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Timeout::After(d) => Some(*d),
            Timeout::Disabled => None,
        }
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Timeout::After(duration)
    }
}

/// Effective signal for one attempt plus the timer that may fire it.
#[derive(Debug)]
pub struct ComposedSignal {
    signal: AbortSignal,
    timer: Option<JoinHandle<()>>,
}

impl ComposedSignal {
    pub fn signal(&self) -> &AbortSignal {
        &self.signal
    }

    /// Cancel the pending timer. Dropping has the same effect.
    pub fn dispose(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for ComposedSignal {
    fn drop(&mut self) {
        self.release();
    }
}

/// Build the effective signal for one attempt.
///
/// Without a timeout the caller signal is returned unchanged (or [`AbortSignal::never`]).
/// Otherwise the derived signal fires with [`AbortReason::Timeout`] when the timeout elapses
/// first, or with the caller's reason when the caller fires first. Must be called inside a
/// tokio runtime.
pub fn compose_signal(caller: Option<&AbortSignal>, timeout: Option<Duration>) -> ComposedSignal {
    let Some(timeout) = timeout else {
        let signal = caller.cloned().unwrap_or_default();
        return ComposedSignal { signal, timer: None };
    };

    let controller = AbortController::new();
    let signal = controller.signal();

    if let Some(reason) = caller.and_then(AbortSignal::reason) {
        controller.abort_with(reason);
        return ComposedSignal { signal, timer: None };
    }

    let upstream = caller.cloned().unwrap_or_default();
    let timer = tokio::spawn(async move {
        tokio::select! {
            reason = upstream.aborted() => {
                controller.abort_with(reason);
            }
            _ = tokio::time::sleep(timeout) => {
                controller.abort_with(AbortReason::Timeout);
            }
        }
    });

    ComposedSignal { signal, timer: Some(timer) }
}
