//! Discard timers
//!
//! Each buffered SDU owns one timer. On expiry the timer does not touch the
//! entity: it posts a [`DiscardTimerExpired`] message into the bearer's
//! serialized strand, which decides whether the SDU is still buffered.

use common::Lcid;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// Posted when a discard timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscardTimerExpired {
    /// Bearer owning the SDU
    pub lcid: Lcid,
    /// SN of the buffered SDU
    pub sn: u32,
    /// Identifies the buffering instance, so a stale expiry for a reused SN is ignored
    pub token: u64,
}

/// Receiving side of the expiry channel, drained by the bearer strand
pub type DiscardTimerReceiver = mpsc::UnboundedReceiver<DiscardTimerExpired>;

/// Armed timer. Dropping it cancels the timer.
#[derive(Debug)]
pub struct DiscardTimer {
    handle: JoinHandle<()>,
}

impl Drop for DiscardTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Arms discard timers for one bearer. Clones share the token sequence, so
/// tokens stay unique across reconfigurations of the bearer.
#[derive(Debug, Clone)]
pub struct DiscardTimerService {
    lcid: Lcid,
    tx: mpsc::UnboundedSender<DiscardTimerExpired>,
    next_token: Arc<AtomicU64>,
}

impl DiscardTimerService {
    /// Create a service and the receiver its expirations are posted to
    pub fn new(lcid: Lcid) -> (Self, DiscardTimerReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Self {
            lcid,
            tx,
            next_token: Arc::new(AtomicU64::new(0)),
        };
        (service, rx)
    }

    /// Fresh token identifying one buffering instance
    pub fn next_token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    /// Arm a timer for `sn`. Returns `None` when no tokio runtime is available.
    pub fn arm(&self, sn: u32, token: u64, timeout: Duration) -> Option<DiscardTimer> {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("{}: no runtime, discard timer for SN={} not armed", self.lcid, sn);
                return None;
            }
        };

        let tx = self.tx.clone();
        let lcid = self.lcid;
        let handle = runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            trace!("{}: discard timer expired for SN={}", lcid, sn);
            // Receiver gone means the bearer was released
            let _ = tx.send(DiscardTimerExpired { lcid, sn, token });
        });

        Some(DiscardTimer { handle })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timer_posts_expiry() {
        let (service, mut rx) = DiscardTimerService::new(Lcid(4));
        let _timer = service.arm(7, 1, Duration::from_millis(100)).unwrap();

        let expired = rx.recv().await.unwrap();
        assert_eq!(
            expired,
            DiscardTimerExpired {
                lcid: Lcid(4),
                sn: 7,
                token: 1
            }
        );
    }

    #[test]
    fn test_tokens_shared_between_clones() {
        let (service, _rx) = DiscardTimerService::new(Lcid(4));
        let clone = service.clone();
        assert_eq!(service.next_token(), 0);
        assert_eq!(clone.next_token(), 1);
        assert_eq!(service.next_token(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_timer_never_fires() {
        let (service, mut rx) = DiscardTimerService::new(Lcid(4));
        let timer = service.arm(7, 1, Duration::from_millis(100)).unwrap();
        drop(timer);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err());
    }
}
