//! Delayed loading indicator.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::watch;

/// Loading flag that is raised only for operations outliving a delay, so
/// fast responses never flash a spinner.
///
/// The flag stays up while any slow tracked operation is running and is
/// lowered when the last tracked operation finishes.
#[derive(Debug)]
pub struct LoadingIndicator {
    delay: Duration,
    active: AtomicUsize,
    status: watch::Sender<bool>,
}

impl LoadingIndicator {
    /// Creates a lowered indicator.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        let (status, _) = watch::channel(false);
        Self {
            delay,
            active: AtomicUsize::new(0),
            status,
        }
    }

    /// Whether the flag is currently raised.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        *self.status.borrow()
    }

    /// Receiver notified on every flag change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.status.subscribe()
    }

    /// Runs `fut`, raising the flag if it has not finished after the delay.
    pub async fn track<F: Future>(&self, fut: F) -> F::Output {
        let _guard = ActiveGuard::enter(self);
        let mut fut = std::pin::pin!(fut);

        match tokio::time::timeout(self.delay, fut.as_mut()).await {
            Ok(output) => output,
            Err(_) => {
                log::debug!("Operation exceeded {:?}; showing loading indicator", self.delay);
                self.status.send_if_modified(|loading| !std::mem::replace(loading, true));
                fut.await
            }
        }
    }
}

/// Counts a tracked operation and lowers the flag when the last one ends,
/// including when the tracking future is dropped early.
struct ActiveGuard<'a> {
    indicator: &'a LoadingIndicator,
}

impl<'a> ActiveGuard<'a> {
    fn enter(indicator: &'a LoadingIndicator) -> Self {
        indicator.active.fetch_add(1, Ordering::SeqCst);
        Self { indicator }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        if self.indicator.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.indicator
                .status
                .send_if_modified(|loading| std::mem::replace(loading, false));
        }
    }
}
