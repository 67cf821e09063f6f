//! Cooperative shutdown signal shared by the long-lived tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// One-way latch: once triggered, every waiter wakes and stays woken.
#[derive(Debug, Default)]
pub struct Shutdown {
    triggered: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    /// Resolves once [`Shutdown::trigger`] has been called.
    pub async fn wait(&self) {
        while !self.is_triggered() {
            let notified = self.notify.notified();
            // Re-check after registering to close the trigger/wait race.
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}
