//! Best-effort run-progress notifications.

use crate::model::RunStatus;
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    pub run_id: String,
    pub completed_cases: u64,
    pub total_cases: u64,
    pub progress: u32,
    pub status: RunStatus,
}

/// Observers must not block; delivery failures are swallowed.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, update: &ProgressUpdate);
}

pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_progress(&self, _update: &ProgressUpdate) {}
}

pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn on_progress(&self, u: &ProgressUpdate) {
        tracing::info!(
            event = "promptgrid.run.progress",
            run_id = %u.run_id,
            completed = u.completed_cases,
            total = u.total_cases,
            progress = u.progress,
            status = %u.status,
        );
    }
}

/// Fan-out over a broadcast channel. Slow receivers lag and lose updates.
#[derive(Clone)]
pub struct BroadcastObserver {
    tx: broadcast::Sender<ProgressUpdate>,
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.tx.subscribe()
    }
}

impl ProgressObserver for BroadcastObserver {
    fn on_progress(&self, update: &ProgressUpdate) {
        // Err only means nobody is listening.
        let _ = self.tx.send(update.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(completed: u64) -> ProgressUpdate {
        ProgressUpdate {
            run_id: "run_1".into(),
            completed_cases: completed,
            total_cases: 4,
            progress: (completed * 25) as u32,
            status: RunStatus::Running,
        }
    }

    #[tokio::test]
    async fn broadcast_delivers_to_subscribers() {
        let obs = BroadcastObserver::new(8);
        let mut rx = obs.subscribe();
        obs.on_progress(&update(1));
        obs.on_progress(&update(2));
        assert_eq!(rx.recv().await.unwrap().completed_cases, 1);
        assert_eq!(rx.recv().await.unwrap().completed_cases, 2);
    }

    #[test]
    fn broadcast_without_subscribers_is_silent() {
        let obs = BroadcastObserver::new(1);
        obs.on_progress(&update(1));
        NoopObserver.on_progress(&update(1));
    }

    #[tokio::test]
    async fn lagging_receiver_skips_ahead() {
        let obs = BroadcastObserver::new(2);
        let mut rx = obs.subscribe();
        for i in 0..5 {
            obs.on_progress(&update(i));
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        assert_eq!(rx.recv().await.unwrap().completed_cases, 3);
    }
}
