//! Shared bridge status.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::time::Instant;

/// What the bridge is doing with the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NavigationStatus {
    /// Idle with the plugin connected (as far as we know).
    Ready,
    /// A `/navigate` request is loading a file.
    Navigating,
    /// The plugin connect sequence is running.
    Reconnecting,
    /// The last navigation or reconnect failed.
    Error,
}

/// Body of `GET /status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    /// Current status.
    pub status: NavigationStatus,
    /// When it last changed.
    pub updated_at: DateTime<Utc>,
}

/// Status plus the guard serializing browser operations.
#[derive(Debug)]
pub struct BridgeState {
    status: RwLock<StatusSnapshot>,
    ops: Mutex<()>,
    last_reconnect: RwLock<Option<Instant>>,
}

impl Default for BridgeState {
    fn default() -> Self {
        Self {
            status: RwLock::new(StatusSnapshot {
                status: NavigationStatus::Ready,
                updated_at: Utc::now(),
            }),
            ops: Mutex::new(()),
            last_reconnect: RwLock::new(None),
        }
    }
}

impl BridgeState {
    /// Current snapshot.
    pub async fn snapshot(&self) -> StatusSnapshot {
        self.status.read().await.clone()
    }

    /// Current status.
    pub async fn status(&self) -> NavigationStatus {
        self.status.read().await.status
    }

    /// Change the status and its timestamp.
    pub async fn set_status(&self, status: NavigationStatus) {
        let mut snapshot = self.status.write().await;
        if snapshot.status != status {
            tracing::debug!(from = ?snapshot.status, to = ?status, "Bridge status");
        }
        snapshot.status = status;
        snapshot.updated_at = Utc::now();
    }

    /// Wait for exclusive use of the browser.
    pub async fn lock_ops(&self) -> MutexGuard<'_, ()> {
        self.ops.lock().await
    }

    /// Exclusive use of the browser, if nobody holds it.
    pub fn try_lock_ops(&self) -> Option<MutexGuard<'_, ()>> {
        self.ops.try_lock().ok()
    }

    /// Record a reconnect attempt.
    pub async fn mark_reconnect(&self) {
        *self.last_reconnect.write().await = Some(Instant::now());
    }

    /// Whether the last reconnect attempt is younger than `cooldown`.
    pub async fn in_cooldown(&self, cooldown: Duration) -> bool {
        self.last_reconnect
            .read()
            .await
            .is_some_and(|at| at.elapsed() < cooldown)
    }
}
