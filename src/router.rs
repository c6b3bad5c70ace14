//! Request routing: gate check, exposure filter, forwarding and recovery.

use std::sync::Arc;

use serde_json::Value;

use crate::config::{RetryPolicy, ACTIVATE_TOOL};
use crate::error::{Error, Result};
use crate::gate::{Gateway, SessionState};
use crate::upstream::UpstreamClient;

impl Gateway {
    /// Handle one `tools/call`. Always yields a result object; failures carry `isError`.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Value {
        if self.config.gated() && name == ACTIVATE_TOOL {
            return self.activate().await.into_value();
        }
        match self.route(name, arguments).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(tool = name, "Tool call rejected: {}", e);
                e.to_tool_result().into_value()
            }
        }
    }

    async fn route(&self, name: &str, arguments: Value) -> Result<Value> {
        let client = self.checkout(name).await?;
        match client.call_tool(name, arguments.clone()).await {
            Ok(result) => Ok(result),
            Err(e) if !e.is_connection_loss() => Err(e),
            Err(e) => self.recover(name, arguments, &client, e).await,
        }
    }

    /// Apply the gate and whitelist, returning the handle to forward through.
    async fn checkout(&self, name: &str) -> Result<Arc<dyn UpstreamClient>> {
        let mut session = self.session.lock().await;

        if self.config.gated() && !session.unlocked {
            return Err(Error::GateLocked {
                tool: name.to_string(),
                skill: self.config.skill_name().to_string(),
            });
        }
        if !self.config.tools.allows(name) {
            return Err(Error::ToolNotExposed(name.to_string()));
        }

        if session.upstream.is_none() {
            if self.config.gated() {
                return Err(Error::UpstreamDisconnected {
                    tool: name.to_string(),
                    reason: "connection was lost earlier".into(),
                    reactivate: true,
                });
            }
            self.bring_up(&mut session).await?;
        }

        session
            .upstream
            .clone()
            .ok_or_else(|| Error::UpstreamUnavailable("no upstream connection".into()))
    }

    async fn recover(
        &self,
        name: &str,
        arguments: Value,
        failed: &Arc<dyn UpstreamClient>,
        cause: Error,
    ) -> Result<Value> {
        let mut session = self.session.lock().await;
        discard(&mut session, failed).await;
        tracing::warn!(tool = name, "Upstream call failed: {}", cause);

        let disconnected = || Error::UpstreamDisconnected {
            tool: name.to_string(),
            reason: cause.to_string(),
            reactivate: self.config.gated(),
        };
        if self.config.gated() || !self.may_retry(&session, name) {
            return Err(disconnected());
        }

        let url = self.connector.url().to_string();
        if session.upstream.is_none() {
            tracing::info!(tool = name, "Reconnecting upstream before retry");
            self.bring_up(&mut session)
                .await
                .map_err(|e| Error::ReconnectFailed {
                    url: url.clone(),
                    reason: e.to_string(),
                })?;
        }
        let client = session
            .upstream
            .clone()
            .ok_or_else(|| Error::UpstreamUnavailable("no upstream connection".into()))?;
        drop(session);

        match client.call_tool(name, arguments).await {
            Ok(result) => Ok(result),
            Err(e) => {
                if e.is_connection_loss() {
                    discard(&mut *self.session.lock().await, &client).await;
                }
                Err(Error::ReconnectFailed {
                    url,
                    reason: e.to_string(),
                })
            }
        }
    }

    fn may_retry(&self, session: &SessionState, name: &str) -> bool {
        match self.config.retry {
            RetryPolicy::Always => true,
            RetryPolicy::Never => false,
            RetryPolicy::Idempotent => session
                .cache
                .as_ref()
                .and_then(|cache| cache.get(name))
                .is_some_and(|tool| tool.is_idempotent()),
        }
    }
}

/// Drop `failed` if it is still the session's handle; the gate stays as it was.
async fn discard(session: &mut SessionState, failed: &Arc<dyn UpstreamClient>) {
    let current = session
        .upstream
        .as_ref()
        .is_some_and(|client| Arc::ptr_eq(client, failed));
    if current {
        session.upstream = None;
        session.init_done = false;
        failed.close().await;
    }
}
