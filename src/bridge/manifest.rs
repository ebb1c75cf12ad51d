//! Per-turn tool manifest assembled from every live pool connection.

use std::collections::HashSet;

use serde_json::Value;

use crate::mcp::pool::ConnectionPool;
use crate::mcp::types::Tool;
use crate::model::ToolDeclaration;

#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub server_id: String,
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Default)]
pub struct ToolManifest {
    entries: Vec<ManifestEntry>,
}

impl ToolManifest {
    /// Discover tools on every active connection concurrently.
    ///
    /// A server that fails to list is left out of this turn's manifest; the
    /// turn itself proceeds.
    pub async fn build(pool: &ConnectionPool) -> Self {
        let connections = pool.active_connections().await;
        let listings = futures_util::future::join_all(connections.into_iter().map(|conn| async move {
            let server_id = conn.descriptor.id.clone();
            match conn.client.list_tools().await {
                Ok(tools) => Some((server_id, tools)),
                Err(e) => {
                    tracing::warn!(server_id = %server_id, "bridge: tool discovery failed: {}", e);
                    None
                }
            }
        }))
        .await;

        Self::from_listings(listings.into_iter().flatten())
    }

    /// Listings must arrive in pool registration order: on a name clash the
    /// earliest server keeps the tool.
    pub fn from_listings(listings: impl IntoIterator<Item = (String, Vec<Tool>)>) -> Self {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for (server_id, tools) in listings {
            for tool in tools {
                if !seen.insert(tool.name.clone()) {
                    tracing::warn!(
                        server_id = %server_id,
                        tool = %tool.name,
                        "bridge: duplicate tool name, keeping the earlier server's"
                    );
                    continue;
                }
                entries.push(ManifestEntry {
                    server_id: server_id.clone(),
                    name: tool.name,
                    description: tool.description,
                    input_schema: tool.input_schema,
                });
            }
        }
        Self { entries }
    }

    pub fn resolve(&self, tool_name: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.name == tool_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.entries
            .iter()
            .map(|e| ToolDeclaration {
                name: e.name.clone(),
                description: e
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("Tool '{}' from MCP server '{}'", e.name, e.server_id)),
                parameters: e.input_schema.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str) -> Tool {
        Tool {
            name: name.to_string(),
            description: None,
            input_schema: json!({ "type": "object", "properties": {} }),
        }
    }

    #[test]
    fn first_registered_server_wins_name_clash() {
        let manifest = ToolManifest::from_listings(vec![
            ("fs1".to_string(), vec![tool("read_file"), tool("list_dir")]),
            ("fs2".to_string(), vec![tool("read_file"), tool("search")]),
        ]);
        assert_eq!(manifest.len(), 3);
        assert_eq!(manifest.resolve("read_file").unwrap().server_id, "fs1");
        assert_eq!(manifest.resolve("search").unwrap().server_id, "fs2");
        assert!(manifest.resolve("missing").is_none());
    }

    #[test]
    fn declarations_fill_missing_descriptions() {
        let manifest = ToolManifest::from_listings(vec![("fs1".to_string(), vec![tool("read_file")])]);
        let decls = manifest.declarations();
        assert_eq!(decls[0].name, "read_file");
        assert!(decls[0].description.contains("fs1"));
    }

    #[test]
    fn empty_listing_yields_empty_manifest() {
        assert!(ToolManifest::from_listings(Vec::new()).is_empty());
    }
}
