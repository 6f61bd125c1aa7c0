use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::AnalyticsError;

/// Re-runs a query on a fixed interval and publishes the latest result.
///
/// The published value is `None` until the first success. Failures are
/// logged and keep whatever was published before; the next tick is the only
/// retry. Dropping the poller stops it.
pub struct Poller<T> {
    name: &'static str,
    latest: watch::Receiver<Option<T>>,
    cancel: CancellationToken,
}

impl<T> Poller<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn spawn<F, Fut>(name: &'static str, interval: Duration, mut fetch: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, AnalyticsError>> + Send + 'static,
    {
        let (tx, latest) = watch::channel(None);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let result = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    result = fetch() => result,
                };
                match result {
                    Ok(value) => {
                        tx.send_replace(Some(value));
                    }
                    Err(e) => {
                        warn!(poller = name, error = %e, kind = e.error_kind(), "poll failed");
                    }
                }
            }
            debug!(poller = name, "poller stopped");
        });

        Self {
            name,
            latest,
            cancel,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn latest(&self) -> Option<T> {
        self.latest.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.latest.clone()
    }

    /// Wait for the next published value. Returns `false` once stopped.
    pub async fn changed(&mut self) -> bool {
        self.latest.changed().await.is_ok()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl<T> Drop for Poller<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
