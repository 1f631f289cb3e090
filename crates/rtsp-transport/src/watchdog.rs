//! Idle-timeout watchdog: closes a transport that has gone quiet.
//!
//! Grounded on `aiortsp.transport.base.RTPTransport.timeout_loop`: rather
//! than waking up on a fixed period, the next sleep is `max(timeout -
//! elapsed_since_last_rx, 1s)`, so a near-miss (traffic arriving just
//! before the deadline) is re-checked soon instead of waiting a full
//! `timeout` again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use tokio_util::sync::CancellationToken;

/// Tracks the last time RTP data was observed on a transport, shared
/// between the receive path and the watchdog task.
#[derive(Debug)]
pub struct LastReceived {
    epoch: Instant,
    millis_since_epoch: AtomicU64,
}

impl LastReceived {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            epoch: Instant::now(),
            millis_since_epoch: AtomicU64::new(0),
        })
    }

    pub fn mark(&self) {
        let elapsed = self.epoch.elapsed().as_millis() as u64;
        self.millis_since_epoch.store(elapsed, Ordering::Relaxed);
    }

    fn elapsed(&self) -> Duration {
        let marked = self.millis_since_epoch.load(Ordering::Relaxed);
        let now = self.epoch.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(marked))
    }
}

/// Spawn the watchdog task. `on_timeout` runs once, when the transport has
/// been idle past `timeout`; the task then exits. Cancelling `token` stops
/// the watchdog without running `on_timeout`.
pub fn spawn<F>(
    last_received: Arc<LastReceived>,
    timeout: Duration,
    token: CancellationToken,
    on_timeout: F,
) -> tokio::task::JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        let mut sleep_for = timeout;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("rtsp transport: watchdog cancelled");
                    return;
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }

            let elapsed = last_received.elapsed();
            if elapsed >= timeout {
                warn!("rtsp transport: idle for {elapsed:?}, exceeding timeout {timeout:?}");
                on_timeout();
                return;
            }

            sleep_for = (timeout - elapsed).max(Duration::from_secs(1));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn fires_after_idle_period() {
        let last = LastReceived::new();
        last.mark();

        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let token = CancellationToken::new();

        let handle = spawn(last, Duration::from_millis(30), token, move || {
            fired_clone.store(true, Ordering::SeqCst);
        });

        handle.await.unwrap();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn does_not_fire_when_cancelled_first() {
        let last = LastReceived::new();
        last.mark();

        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let token = CancellationToken::new();
        let token_clone = token.clone();

        let handle = spawn(last, Duration::from_secs(5), token, move || {
            fired_clone.store(true, Ordering::SeqCst);
        });

        token_clone.cancel();
        handle.await.unwrap();
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn recent_activity_resets_the_deadline() {
        let last = LastReceived::new();
        last.mark();

        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let token = CancellationToken::new();

        let last_for_task = last.clone();
        let handle = spawn(last_for_task, Duration::from_millis(60), token, move || {
            fired_clone.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        last.mark();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!handle.is_finished());
        handle.abort();
        let _ = fired;
    }
}
