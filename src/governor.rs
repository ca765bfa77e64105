//! Sliding-window request admission control
//!
//! One governor instance is shared by every gateway in the process and
//! tracks a 60-second timestamp window per backend identifier. Admission
//! blocks the caller until a slot is free; it never fails.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

const WINDOW: Duration = Duration::from_secs(60);

/// Small buffer past the window edge so a re-check after the wait always
/// finds the oldest slot expired.
const WAIT_BUFFER: Duration = Duration::from_millis(500);

/// Per-backend-identifier sliding-window rate governor.
pub struct RateGovernor {
    // Outer lock only guards entry creation; the per-identifier lock is
    // held across the wait so concurrent admits for one backend cannot
    // both observe the same free slot.
    windows: Mutex<HashMap<String, Arc<Mutex<VecDeque<Instant>>>>>,
}

impl RateGovernor {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Block until a request slot is available for `backend`, then record
    /// the slot as consumed. `rpm <= 0` means unlimited and bypasses the
    /// window entirely.
    pub async fn admit(&self, backend: &str, rpm: i64) {
        if rpm <= 0 {
            return;
        }

        let window = {
            let mut windows = self.windows.lock().await;
            windows
                .entry(backend.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new())))
                .clone()
        };

        let mut history = window.lock().await;
        let now = Instant::now();
        evict_expired(&mut history, now);

        if history.len() >= rpm as usize {
            let oldest = *history.front().expect("window at capacity is non-empty");
            let wait = WINDOW.saturating_sub(now.duration_since(oldest)) + WAIT_BUFFER;

            warn!(
                backend = %backend,
                rpm,
                wait_secs = wait.as_secs_f64(),
                "Rate limit hit, waiting for a slot"
            );

            sleep(wait).await;
            evict_expired(&mut history, Instant::now());
        } else {
            debug!(backend = %backend, in_window = history.len(), "Slot available");
        }

        history.push_back(Instant::now());
    }
}

impl Default for RateGovernor {
    fn default() -> Self {
        Self::new()
    }
}

fn evict_expired(history: &mut VecDeque<Instant>, now: Instant) {
    while history
        .front()
        .is_some_and(|t| now.duration_since(*t) > WINDOW)
    {
        history.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn test_within_capacity_admits_immediately() {
        let governor = RateGovernor::new();
        let start = Instant::now();
        for _ in 0..5 {
            governor.admit("model-a", 5).await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_excess_admission_waits_out_the_window() {
        let governor = RateGovernor::new();
        let start = Instant::now();

        governor.admit("model-a", 2).await;
        governor.admit("model-a", 2).await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        // Third call must wait until the first slot leaves the 60s window.
        governor.admit("model-a", 2).await;
        assert!(start.elapsed() >= WINDOW);
        assert!(start.elapsed() <= WINDOW + Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_after_idle_window_never_blocks() {
        let governor = RateGovernor::new();
        governor.admit("model-a", 1).await;

        advance(WINDOW + Duration::from_secs(1)).await;

        let before = Instant::now();
        governor.admit("model-a", 1).await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_capacity_means_unlimited() {
        let governor = RateGovernor::new();
        let start = Instant::now();
        for _ in 0..100 {
            governor.admit("model-a", 0).await;
            governor.admit("model-b", -1).await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identifiers_are_independent() {
        let governor = RateGovernor::new();
        governor.admit("model-a", 1).await;

        let start = Instant::now();
        governor.admit("model-b", 1).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_admits_do_not_overshoot() {
        let governor = Arc::new(RateGovernor::new());
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let governor = governor.clone();
            handles.push(tokio::spawn(async move {
                governor.admit("model-a", 2).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Only two of the three fit the window; the last waited it out.
        assert!(start.elapsed() >= WINDOW);
    }
}
