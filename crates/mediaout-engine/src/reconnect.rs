// crates/mediaout-engine/src/reconnect.rs
//
// Exponential-backoff retry worker (spec §4.6). Grounded on `worker.rs`'s
// frame-request slot — a condvar-guarded shared cell the producer notifies
// and the worker wakes from — but waiting on a timeout instead of a
// value, and deliberately *not* joined on cancellation (spec §9: "avoid
// detaching except the reconnect worker post-cancellation, where the
// handle is deliberately abandoned").

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use mediaout_core::config::RECONNECT_DELAY_CAP_SECS;

/// `reconnect_retry_sec · 1000 · exponent^attempt`, clamped to the 15-minute
/// cap (spec §4.6). `attempt` is 0-based: the first scheduled retry is
/// `attempt = 0`.
pub fn compute_backoff_ms(attempt: u32, base_delay_secs: f64, exponent: f64) -> f64 {
    let raw_ms = base_delay_secs * 1000.0 * exponent.powi(attempt as i32);
    raw_ms.min(RECONNECT_DELAY_CAP_SECS * 1000.0)
}

/// `1.5 + jitter`, jitter drawn once per `Output` when it first enters the
/// reconnecting state (spec §4.6: "`reconnect_retry_exp` initialized to
/// `1.5 + jitter ∈ [0, 0.05)`") — not re-rolled on every retry.
pub fn jittered_exponent(base_exponent: f64) -> f64 {
    base_exponent + rand::random::<f64>() * 0.05
}

/// A single in-flight retry wait. Cancelling abandons the thread rather
/// than joining it — it wakes on its own condvar notification and exits.
pub struct ReconnectWorker {
    cancel: Arc<(Mutex<bool>, Condvar)>,
}

impl ReconnectWorker {
    /// Spawn a worker that waits `delay_ms`, then calls `on_timeout` unless
    /// cancelled first. `on_timeout` runs on the worker thread.
    pub fn spawn(delay_ms: f64, on_timeout: impl FnOnce() + Send + 'static) -> Self {
        let cancel = Arc::new((Mutex::new(false), Condvar::new()));
        let worker_cancel = Arc::clone(&cancel);
        let delay = Duration::from_secs_f64((delay_ms / 1000.0).max(0.0));

        thread::spawn(move || {
            let (lock, cvar) = &*worker_cancel;
            let guard = lock.lock().unwrap();
            let (guard, timeout_result) = cvar.wait_timeout(guard, delay).unwrap();
            if *guard {
                return; // cancelled before timeout — detach and exit silently
            }
            drop(guard);
            if timeout_result.timed_out() {
                on_timeout();
            }
        });

        Self { cancel }
    }

    /// Signal the worker to stop. Non-blocking: per spec §5, `force_stop`
    /// is non-blocking w.r.t. reconnect.
    pub fn cancel(&self) {
        let (lock, cvar) = &*self.cancel;
        *lock.lock().unwrap() = true;
        cvar.notify_one();
    }
}
