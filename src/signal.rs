//! Cancellation signals.
//!
//! An [`AbortController`] owns the right to fire; every clone of its [`AbortSignal`] observes
//! the same single-fire state. The first `abort_with` call decides the [`AbortReason`]; later
//! calls are ignored, so a signal never changes its mind about why it fired.

use std::sync::{Arc, OnceLock};
use tokio::sync::Notify;

/// Why a signal fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// An internally composed timeout elapsed.
    Timeout,
    /// The caller cancelled explicitly.
    Cancelled,
}

#[derive(Debug, Default)]
struct SignalState {
    reason: OnceLock<AbortReason>,
    notify: Notify,
}

/// Read side of a cancellation source. Cheap to clone.
///
/// The default signal never fires.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    state: Option<Arc<SignalState>>,
}

impl AbortSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { state: None }
    }

    pub fn reason(&self) -> Option<AbortReason> {
        self.state.as_ref().and_then(|s| s.reason.get().copied())
    }

    pub fn is_aborted(&self) -> bool {
        self.reason().is_some()
    }

    /// Resolve once the signal fires. Pending forever for [`AbortSignal::never`].
    pub async fn aborted(&self) -> AbortReason {
        let Some(state) = &self.state else {
            return std::future::pending().await;
        };
        loop {
            // Register before checking so a concurrent fire cannot slip between the two.
            let notified = state.notify.notified();
            if let Some(reason) = state.reason.get() {
                return *reason;
            }
            notified.await;
        }
    }
}

/// Write side of a cancellation source.
#[derive(Debug, Clone)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    pub fn new() -> Self {
        Self { signal: AbortSignal { state: Some(Arc::new(SignalState::default())) } }
    }

    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Cancel on behalf of the caller.
    pub fn abort(&self) -> bool {
        self.abort_with(AbortReason::Cancelled)
    }

    /// Fire with `reason`. Returns `false` when the signal had already fired.
    pub fn abort_with(&self, reason: AbortReason) -> bool {
        let Some(state) = &self.signal.state else {
            return false;
        };
        let fired = state.reason.set(reason).is_ok();
        if fired {
            state.notify.notify_waiters();
        }
        fired
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}
