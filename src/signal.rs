//! Process-wide shutdown notification.
//!
//! A `ctrlc` handler (SIGINT and, with the `termination` feature, SIGTERM)
//! flips a flag and wakes whoever awaits [Shutdown::wait].

use crate::error::Result;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct Shutdown {
    fired: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Shutdown {
    /// A handle that only fires through [Shutdown::trigger].
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the process signal handler. May be called once per process.
    pub fn install() -> Result<Self> {
        let shutdown = Self::new();
        let handle = shutdown.clone();
        ctrlc::set_handler(move || handle.trigger())?;
        Ok(shutdown)
    }

    pub fn trigger(&self) {
        self.fired.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_triggered(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Resolve once a shutdown was requested, including before the call.
    pub async fn wait(&self) {
        if self.is_triggered() {
            return;
        }
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_returns_after_earlier_trigger() {
        let s = Shutdown::new();
        s.trigger();
        tokio::time::timeout(Duration::from_secs(1), s.wait())
            .await
            .expect("already triggered");
        // a second wait must not hang either
        tokio::time::timeout(Duration::from_secs(1), s.wait())
            .await
            .expect("flag stays set");
    }

    #[tokio::test(start_paused = true)]
    async fn untriggered_wait_pends() {
        let s = Shutdown::new();
        let res = tokio::time::timeout(Duration::from_secs(5), s.wait()).await;
        assert!(res.is_err());
        assert!(!s.is_triggered());
    }
}
