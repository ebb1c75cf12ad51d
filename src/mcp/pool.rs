//! Process-wide registry of live MCP connections.
//!
//! The map itself sits behind one mutex that is only held for insert, remove
//! and snapshot. Network and process I/O always happens on an `Arc<McpClient>`
//! cloned out of the map, so slow servers never block each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::client::{ClientOptions, McpClient};
use super::error::McpError;
use super::types::{ConnectionStatus, Prompt, Resource, ServerDescriptor, Tool};

struct PoolEntry {
    client: Arc<McpClient>,
    descriptor: ServerDescriptor,
    last_activity: DateTime<Utc>,
    /// Registration order; the manifest breaks tool-name ties with it.
    seq: u64,
}

/// A connection borrowed out of the pool for the duration of one operation.
#[derive(Clone)]
pub struct ActiveConnection {
    pub descriptor: ServerDescriptor,
    pub client: Arc<McpClient>,
}

pub struct ConnectionPool {
    entries: Mutex<HashMap<String, PoolEntry>>,
    /// Per-id counter bumped by every `connect`, `disconnect` and `shutdown`.
    /// A handshake only registers if its id's epoch is unchanged when it
    /// completes. Only touched while `entries` is locked, except the bump at
    /// the start of `connect`.
    epochs: std::sync::Mutex<HashMap<String, u64>>,
    next_seq: AtomicU64,
    http: reqwest::Client,
    options: ClientOptions,
}

impl ConnectionPool {
    pub fn new(http: reqwest::Client, options: ClientOptions) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            epochs: std::sync::Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            http,
            options,
        }
    }

    // ── Connect / Disconnect ────────────────────────────────────────────

    /// Connect `descriptor`, replacing any existing entry for the same id.
    ///
    /// The old entry is closed before the new transport is opened. The
    /// handshake runs without the map lock; if a `disconnect`, `shutdown` or
    /// newer `connect` for the same id happened meanwhile, the fresh client
    /// is closed and never registered.
    pub async fn connect(&self, descriptor: ServerDescriptor) -> Result<(), McpError> {
        descriptor.validate()?;
        if !descriptor.enabled {
            return Err(McpError::Disabled(descriptor.id.clone()));
        }

        let epoch = self.advance_epoch(&descriptor.id);
        let previous = self.entries.lock().await.remove(&descriptor.id);
        if let Some(old) = previous {
            tracing::info!(server_id = %descriptor.id, "MCP: replacing existing connection");
            old.client.close().await;
        }

        tracing::info!(
            server_id = %descriptor.id,
            transport = ?descriptor.transport,
            "MCP: connecting to '{}'",
            descriptor.name
        );
        let client = Arc::new(McpClient::connect(&descriptor, &self.http, self.options).await?);

        let id = descriptor.id.clone();
        let mut entries = self.entries.lock().await;
        if self.epoch(&id) != epoch {
            drop(entries);
            tracing::info!(server_id = %id, "MCP: connection superseded while handshaking, closing it");
            client.close().await;
            return Err(McpError::Connect {
                server_id: id,
                reason: "superseded by a disconnect or newer connect during the handshake".into(),
            });
        }
        let entry = PoolEntry {
            client,
            descriptor,
            last_activity: Utc::now(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        let displaced = entries.insert(id.clone(), entry);
        drop(entries);
        if let Some(raced) = displaced {
            tracing::warn!(server_id = %id, "MCP: concurrent connect displaced a connection, closing it");
            raced.client.close().await;
        }

        tracing::info!(server_id = %id, "MCP: connected");
        Ok(())
    }

    /// Close and forget `server_id`. Absent ids are a successful no-op.
    /// A handshake still in flight for `server_id` is abandoned.
    pub async fn disconnect(&self, server_id: &str) {
        let removed = {
            let mut entries = self.entries.lock().await;
            if let Some(epoch) = self.lock_epochs().get_mut(server_id) {
                *epoch += 1;
            }
            entries.remove(server_id)
        };
        match removed {
            Some(entry) => {
                entry.client.close().await;
                tracing::info!(server_id, "MCP: disconnected");
            }
            None => tracing::debug!(server_id, "MCP: disconnect of unknown server ignored"),
        }
    }

    /// Close every connection. Called once on shutdown.
    pub async fn shutdown(&self) {
        let drained: Vec<PoolEntry> = {
            let mut entries = self.entries.lock().await;
            self.lock_epochs().values_mut().for_each(|epoch| *epoch += 1);
            entries.drain().map(|(_, e)| e).collect()
        };
        let count = drained.len();
        futures_util::future::join_all(drained.iter().map(|e| e.client.close())).await;
        tracing::info!("MCP: pool drained ({} connection(s) closed)", count);
    }

    /// Remove entries whose transport died on its own (exited process,
    /// closed session). Returns the ids that were reaped.
    pub async fn reap_dead(&self) -> Vec<String> {
        let dead: Vec<PoolEntry> = {
            let mut lock = self.entries.lock().await;
            let ids: Vec<String> = lock
                .iter()
                .filter(|(_, e)| !e.client.is_alive())
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| lock.remove(id)).collect()
        };

        let mut ids = Vec::with_capacity(dead.len());
        for entry in dead {
            tracing::warn!(server_id = %entry.descriptor.id, "MCP: reaping dead connection");
            entry.client.close().await;
            ids.push(entry.descriptor.id);
        }
        ids
    }

    fn lock_epochs(&self) -> std::sync::MutexGuard<'_, HashMap<String, u64>> {
        self.epochs.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn advance_epoch(&self, server_id: &str) -> u64 {
        let mut epochs = self.lock_epochs();
        let epoch = epochs.entry(server_id.to_string()).or_insert(0);
        *epoch += 1;
        *epoch
    }

    fn epoch(&self, server_id: &str) -> u64 {
        self.lock_epochs().get(server_id).copied().unwrap_or(0)
    }

    // ── Lookup ──────────────────────────────────────────────────────────

    async fn borrow(&self, server_id: &str) -> Result<Arc<McpClient>, McpError> {
        self.entries
            .lock()
            .await
            .get(server_id)
            .map(|e| e.client.clone())
            .ok_or_else(|| McpError::NotConnected(server_id.to_string()))
    }

    async fn touch(&self, server_id: &str, client: &Arc<McpClient>) {
        if let Some(entry) = self.entries.lock().await.get_mut(server_id) {
            // Only the connection we actually used; it may have been replaced meanwhile.
            if Arc::ptr_eq(&entry.client, client) {
                entry.last_activity = Utc::now();
            }
        }
    }

    pub async fn contains(&self, server_id: &str) -> bool {
        self.entries.lock().await.contains_key(server_id)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn last_activity(&self, server_id: &str) -> Option<DateTime<Utc>> {
        self.entries.lock().await.get(server_id).map(|e| e.last_activity)
    }

    /// Snapshot of live connections in registration order.
    pub async fn active_connections(&self) -> Vec<ActiveConnection> {
        let lock = self.entries.lock().await;
        let mut entries: Vec<&PoolEntry> = lock.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries
            .into_iter()
            .map(|e| ActiveConnection {
                descriptor: e.descriptor.clone(),
                client: e.client.clone(),
            })
            .collect()
    }

    pub async fn active_clients(&self) -> Vec<Arc<McpClient>> {
        self.active_connections().await.into_iter().map(|c| c.client).collect()
    }

    pub async fn active_servers(&self) -> Vec<ServerDescriptor> {
        self.active_connections().await.into_iter().map(|c| c.descriptor).collect()
    }

    // ── Operations ──────────────────────────────────────────────────────

    /// Probe the connection with `resources/list`.
    pub async fn status(&self, server_id: &str) -> ConnectionStatus {
        let client = match self.borrow(server_id).await {
            Ok(c) => c,
            Err(_) => return ConnectionStatus::disconnected(),
        };
        match client.list_resources().await {
            Ok(_) => {
                self.touch(server_id, &client).await;
                ConnectionStatus::connected(Utc::now(), client.server_info())
            }
            Err(e) => {
                tracing::warn!(server_id, "MCP: status probe failed: {}", e);
                ConnectionStatus::error(format!("server not responding: {}", e))
            }
        }
    }

    pub async fn list_resources(&self, server_id: &str) -> Result<Vec<Resource>, McpError> {
        let client = self.borrow(server_id).await?;
        let out = client.list_resources().await?;
        self.touch(server_id, &client).await;
        Ok(out)
    }

    pub async fn list_tools(&self, server_id: &str) -> Result<Vec<Tool>, McpError> {
        let client = self.borrow(server_id).await?;
        let out = client.list_tools().await?;
        self.touch(server_id, &client).await;
        Ok(out)
    }

    pub async fn list_prompts(&self, server_id: &str) -> Result<Vec<Prompt>, McpError> {
        let client = self.borrow(server_id).await?;
        let out = client.list_prompts().await?;
        self.touch(server_id, &client).await;
        Ok(out)
    }

    pub async fn call_tool(
        &self,
        server_id: &str,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<Value, McpError> {
        let client = self.borrow(server_id).await?;
        let out = client.call_tool(name, arguments).await?;
        self.touch(server_id, &client).await;
        Ok(out)
    }

    pub async fn read_resource(&self, server_id: &str, uri: &str) -> Result<Value, McpError> {
        let client = self.borrow(server_id).await?;
        let out = client.read_resource(uri).await?;
        self.touch(server_id, &client).await;
        Ok(out)
    }

    pub async fn get_prompt(
        &self,
        server_id: &str,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<Value, McpError> {
        let client = self.borrow(server_id).await?;
        let out = client.get_prompt(name, arguments).await?;
        self.touch(server_id, &client).await;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::types::TransportKind;

    fn pool() -> ConnectionPool {
        ConnectionPool::new(reqwest::Client::new(), ClientOptions::default())
    }

    fn descriptor(id: &str) -> ServerDescriptor {
        ServerDescriptor {
            id: id.to_string(),
            name: id.to_string(),
            description: None,
            transport: TransportKind::Stdio,
            command: Some("/definitely/not/a/real/binary".into()),
            args: vec![],
            env: HashMap::new(),
            url: None,
            headers: HashMap::new(),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn disconnect_unknown_is_noop() {
        let p = pool();
        p.disconnect("ghost").await;
        p.disconnect("ghost").await;
        assert!(p.is_empty().await);
    }

    #[tokio::test]
    async fn disabled_descriptor_is_refused() {
        let p = pool();
        let mut d = descriptor("off");
        d.enabled = false;
        assert!(matches!(p.connect(d).await, Err(McpError::Disabled(_))));
        assert!(!p.contains("off").await);
    }

    #[tokio::test]
    async fn failed_spawn_registers_nothing() {
        let p = pool();
        let err = p.connect(descriptor("broken")).await.unwrap_err();
        assert!(matches!(err, McpError::Connect { .. }));
        assert!(!p.contains("broken").await);
    }

    #[tokio::test]
    async fn status_of_unknown_is_disconnected() {
        let s = pool().status("nobody").await;
        assert!(!s.connected);
        assert_eq!(s.status, crate::mcp::types::ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn operations_on_unknown_id_fail_not_connected() {
        let p = pool();
        assert!(matches!(p.list_tools("x").await, Err(McpError::NotConnected(_))));
        assert!(matches!(
            p.call_tool("x", "t", Map::new()).await,
            Err(McpError::NotConnected(_))
        ));
    }
}
