//! Plugin liveness monitor.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::plugin::plugin_connected;
use super::state::NavigationStatus;
use super::Bridge;

/// What one monitor tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorTick {
    /// Busy, cooling down or navigating; nothing checked.
    Skipped,
    /// The plugin reported connected.
    Healthy,
    /// A reconnect ran and succeeded.
    Reconnected,
    /// A reconnect ran and failed; a tick after the cooldown retries.
    ReconnectFailed,
    /// The status check itself failed.
    CheckFailed,
}

/// One liveness check, reconnecting when the plugin dropped.
///
/// Runs from `ready` and from `error`, so a failed navigation or reconnect is
/// retried here. A healthy check clears `error`.
pub async fn tick(bridge: &Bridge) -> MonitorTick {
    let status = bridge.state().status().await;
    if !matches!(status, NavigationStatus::Ready | NavigationStatus::Error) {
        return MonitorTick::Skipped;
    }
    let cooldown = bridge.config().timings.reconnect_cooldown();
    if bridge.state().in_cooldown(cooldown).await {
        return MonitorTick::Skipped;
    }
    let Some(_ops) = bridge.state().try_lock_ops() else {
        return MonitorTick::Skipped;
    };

    match plugin_connected(bridge.driver()).await {
        Ok(true) => {
            if bridge.state().status().await == NavigationStatus::Error {
                tracing::info!("[monitor] Plugin connected, clearing error status");
                bridge.state().set_status(NavigationStatus::Ready).await;
            }
            MonitorTick::Healthy
        }
        Ok(false) => {
            tracing::info!("[monitor] Plugin disconnected, reconnecting");
            bridge.state().mark_reconnect().await;
            match bridge.reconnect_plugin().await {
                Ok(()) => MonitorTick::Reconnected,
                Err(_) => {
                    if bridge.state().status().await == NavigationStatus::Error {
                        bridge.state().set_status(NavigationStatus::Ready).await;
                    }
                    tracing::info!("[monitor] Will retry on next interval");
                    MonitorTick::ReconnectFailed
                }
            }
        }
        Err(e) => {
            tracing::warn!("[monitor] Check failed: {}", e);
            MonitorTick::CheckFailed
        }
    }
}

/// Run [`tick`] every monitor interval until the task is aborted.
pub fn spawn(bridge: Arc<Bridge>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(bridge.config().timings.monitor_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval.tick().await;
        loop {
            interval.tick().await;
            let outcome = tick(&bridge).await;
            tracing::trace!(?outcome, "[monitor] tick");
        }
    })
}
