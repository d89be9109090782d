//! External control of a running session: abort, pause, resume, and a
//! live view of its status.
//!
//! Signals are only observed at the loop's checkpoints, so an in-flight
//! model or action call always finishes first. Waiting for a resume or an
//! abort parks on a watch channel instead of polling.

use helmsman_core::session::LoopStatus;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Signals {
    paused: bool,
    aborted: bool,
}

/// Cheap to clone; every clone controls the same session.
#[derive(Debug, Clone)]
pub struct LoopControl {
    signals: Arc<watch::Sender<Signals>>,
    status: Arc<watch::Sender<LoopStatus>>,
}

impl Default for LoopControl {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopControl {
    pub fn new() -> Self {
        Self {
            signals: Arc::new(watch::channel(Signals::default()).0),
            status: Arc::new(watch::channel(LoopStatus::Running).0),
        }
    }

    /// Stop at the next checkpoint. Idempotent.
    pub fn abort(&self) {
        let changed = self.signals.send_if_modified(|s| !std::mem::replace(&mut s.aborted, true));
        if changed {
            info!("Abort requested");
        }
    }

    /// Park at the next checkpoint until [`resume`](Self::resume) or [`abort`](Self::abort).
    pub fn pause(&self) {
        let changed = self
            .signals
            .send_if_modified(|s| !s.aborted && !std::mem::replace(&mut s.paused, true));
        if changed {
            info!("Pause requested");
        }
    }

    /// No-op unless paused.
    pub fn resume(&self) {
        let changed = self
            .signals
            .send_if_modified(|s| std::mem::replace(&mut s.paused, false));
        if changed {
            info!("Resume requested");
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.signals.borrow().aborted
    }

    pub fn is_paused(&self) -> bool {
        self.signals.borrow().paused
    }

    pub fn status(&self) -> LoopStatus {
        *self.status.borrow()
    }

    /// Follow status changes as they happen.
    pub fn watch_status(&self) -> watch::Receiver<LoopStatus> {
        self.status.subscribe()
    }

    pub(crate) fn set_status(&self, status: LoopStatus) {
        self.status.send_replace(status);
    }

    /// Resolves once paused is cleared. Returns false if aborted instead.
    pub(crate) async fn wait_for_resume(&self) -> bool {
        let mut rx = self.signals.subscribe();
        rx.wait_for(|s| !s.paused || s.aborted)
            .await
            .map(|s| !s.aborted)
            .unwrap_or(false)
    }

    /// Resolves once abort has been requested.
    pub(crate) async fn aborted(&self) {
        let mut rx = self.signals.subscribe();
        let _ = rx.wait_for(|s| s.aborted).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn abort_is_idempotent() {
        let control = LoopControl::new();
        control.abort();
        control.abort();
        assert!(control.is_aborted());
    }

    #[test]
    fn resume_without_pause_is_noop() {
        let control = LoopControl::new();
        let rx = control.signals.subscribe();
        control.resume();
        assert!(!rx.has_changed().unwrap());
        assert!(!control.is_paused());
    }

    #[test]
    fn pause_after_abort_is_ignored() {
        let control = LoopControl::new();
        control.abort();
        control.pause();
        assert!(!control.is_paused());
    }

    #[tokio::test]
    async fn resume_wakes_waiter() {
        let control = LoopControl::new();
        control.pause();

        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_for_resume().await })
        };
        tokio::task::yield_now().await;
        control.resume();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn abort_releases_paused_waiter() {
        let control = LoopControl::new();
        control.pause();

        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_for_resume().await })
        };
        control.abort();
        assert!(!waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_waits_for_signal() {
        let control = LoopControl::new();
        let pending = tokio::time::timeout(Duration::from_secs(1), control.aborted()).await;
        assert!(pending.is_err());

        control.abort();
        tokio::time::timeout(Duration::from_secs(1), control.aborted())
            .await
            .unwrap();
    }

    #[test]
    fn status_is_observable() {
        let control = LoopControl::new();
        let rx = control.watch_status();
        assert_eq!(control.status(), LoopStatus::Running);
        control.set_status(LoopStatus::Paused);
        assert_eq!(*rx.borrow(), LoopStatus::Paused);
    }
}
