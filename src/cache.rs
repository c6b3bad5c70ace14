//! Local copy of the upstream's advertised tool descriptors.

use std::collections::HashMap;

use crate::config::ToolPolicy;
use crate::error::{Error, Result};
use crate::protocol::ToolDefinition;
use crate::upstream::UpstreamClient;

/// Tool descriptors keyed by name, in upstream order.
#[derive(Debug, Clone, Default)]
pub struct ToolSchemaCache {
    order: Vec<String>,
    tools: HashMap<String, ToolDefinition>,
}

impl ToolSchemaCache {
    /// Fetch a fresh listing. The caller replaces its cache wholesale.
    pub async fn refresh(client: Option<&dyn UpstreamClient>) -> Result<Self> {
        let client = client.ok_or_else(|| Error::UpstreamUnavailable("no upstream connection".into()))?;
        let tools = client
            .list_tools()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("tools/list failed: {e}")))?;
        let cache = Self::from_tools(tools);
        tracing::debug!(count = cache.len(), "Cached upstream tool schemas");
        Ok(cache)
    }

    /// Build from a listing; later duplicates replace earlier ones.
    pub fn from_tools(tools: impl IntoIterator<Item = ToolDefinition>) -> Self {
        let mut cache = Self::default();
        for tool in tools {
            if !cache.tools.contains_key(&tool.name) {
                cache.order.push(tool.name.clone());
            }
            cache.tools.insert(tool.name.clone(), tool);
        }
        cache
    }

    /// Look up one descriptor.
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    /// Number of cached tools.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Descriptors passing `policy`: upstream order for the wildcard, policy
    /// order for an explicit list (names the upstream lacks are skipped).
    pub fn exposed<'a>(&'a self, policy: &'a ToolPolicy) -> Vec<&'a ToolDefinition> {
        match policy {
            ToolPolicy::All => self.order.iter().filter_map(|n| self.tools.get(n)).collect(),
            ToolPolicy::Allowed(names) => names.iter().filter_map(|n| self.tools.get(n)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str) -> ToolDefinition {
        ToolDefinition::new(name, format!("{name} tool"), json!({"type": "object"}))
    }

    #[test]
    fn policy_controls_order_and_membership() {
        let cache = ToolSchemaCache::from_tools([tool("z"), tool("x"), tool("y")]);
        let names = |p: &ToolPolicy| -> Vec<String> {
            cache.exposed(p).into_iter().map(|t| t.name.clone()).collect()
        };
        assert_eq!(names(&ToolPolicy::All), ["z", "x", "y"]);
        assert_eq!(
            names(&ToolPolicy::Allowed(vec!["y".into(), "missing".into(), "x".into()])),
            ["y", "x"]
        );
    }

    #[tokio::test]
    async fn refresh_without_connection_is_unavailable() {
        let err = ToolSchemaCache::refresh(None).await.unwrap_err();
        assert!(matches!(err, Error::UpstreamUnavailable(_)));
    }
}
