//! Last-value-wins debouncing for rapid cursor changes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Lets only the last of a burst of values through.
///
/// Every call to [`Debouncer::settle`] waits for the quiescence window and
/// then yields its value only if no later call was made in the meantime.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    latest: AtomicU64,
}

impl Debouncer {
    /// Creates a debouncer with the given quiescence window.
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            latest: AtomicU64::new(0),
        }
    }

    /// Quiescence window.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Waits out the window; `None` if a newer value arrived meanwhile.
    pub async fn settle<T>(&self, value: T) -> Option<T> {
        let ticket = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.window.is_zero() {
            tokio::time::sleep(self.window).await;
        }

        if self.latest.load(Ordering::SeqCst) == ticket {
            Some(value)
        } else {
            log::trace!("Debounced value #{ticket} superseded");
            None
        }
    }
}
