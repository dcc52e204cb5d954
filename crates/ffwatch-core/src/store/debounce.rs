// ── Trailing debounce with max-wait ──
//
// A request runs its job right away when forced, when nothing ran yet, or
// when the last real run is at least `max_wait` old. Otherwise it replaces
// any pending deferred run with a new one `delay` from now. Pending runs
// are cancel-and-replace tokens, never stacked timers.

use std::sync::{Arc, Mutex};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::config::DebounceConfig;

/// How a request was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Immediate,
    Deferred,
}

#[derive(Default)]
struct State {
    last_run: Option<Instant>,
    pending: Option<CancellationToken>,
}

/// Coalesces bursts of requests for an expensive job.
///
/// Deferred runs are spawned on the current tokio runtime.
pub struct Debouncer {
    config: DebounceConfig,
    state: Arc<Mutex<State>>,
}

impl Debouncer {
    pub fn new(config: DebounceConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Request a run of `job`. `force` bypasses the debounce.
    pub fn request<F>(&self, force: bool, job: F) -> Trigger
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock().expect("debounce lock poisoned");
        if let Some(pending) = state.pending.take() {
            pending.cancel();
        }

        let now = Instant::now();
        let due = force
            || state
                .last_run
                .is_none_or(|last| now.duration_since(last) >= self.config.max_wait);
        if due {
            state.last_run = Some(now);
            drop(state);
            job();
            return Trigger::Immediate;
        }

        let token = CancellationToken::new();
        state.pending = Some(token.clone());
        drop(state);

        let shared = Arc::clone(&self.state);
        let delay = self.config.delay;
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => trace!("deferred run replaced"),
                () = tokio::time::sleep(delay) => {
                    {
                        let mut state = shared.lock().expect("debounce lock poisoned");
                        // Replaced between the timer firing and taking the lock.
                        if token.is_cancelled() {
                            return;
                        }
                        state.pending = None;
                        state.last_run = Some(Instant::now());
                    }
                    job();
                }
            }
        });
        Trigger::Deferred
    }

    #[cfg(test)]
    fn last_run(&self) -> Option<Instant> {
        self.state.lock().expect("debounce lock poisoned").last_run
    }
}

impl Drop for Debouncer {
    /// A pending deferred run dies with its debouncer.
    fn drop(&mut self) {
        let pending = self.state.lock().ok().and_then(|mut state| state.pending.take());
        if let Some(pending) = pending {
            pending.cancel();
        }
    }
}
