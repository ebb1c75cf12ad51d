use thiserror::Error;

/// JSON-RPC code a server returns for a method it does not implement.
pub const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Clone, Error)]
pub enum McpError {
    /// Spawn or dial failure; no pool entry is created.
    #[error("failed to connect to '{server_id}': {reason}")]
    Connect { server_id: String, reason: String },

    #[error("connecting to '{server_id}' timed out after {secs}s")]
    ConnectTimeout { server_id: String, secs: u64 },

    /// JSON-RPC error object returned by the server.
    #[error("MCP error {code}: {message}")]
    Protocol { code: i64, message: String },

    #[error("'{method}' timed out after {secs}s")]
    Timeout { method: String, secs: u64 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("server '{0}' is not connected")]
    NotConnected(String),

    #[error("invalid server descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("server '{0}' is disabled")]
    Disabled(String),
}

impl McpError {
    /// `true` when the server simply lacks the requested capability.
    pub fn is_method_not_found(&self) -> bool {
        matches!(self, McpError::Protocol { code, .. } if *code == METHOD_NOT_FOUND)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, McpError::Timeout { .. } | McpError::ConnectTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_not_found_matches_on_code_only() {
        let missing = McpError::Protocol { code: METHOD_NOT_FOUND, message: "nope".into() };
        assert!(missing.is_method_not_found());

        // A message that merely mentions the code is not a capability gap.
        let other = McpError::Protocol { code: -32603, message: "-32601 Method not found".into() };
        assert!(!other.is_method_not_found());
        assert!(!McpError::Transport("-32601".into()).is_method_not_found());
    }

    #[test]
    fn timeouts_are_classified() {
        assert!(McpError::Timeout { method: "tools/list".into(), secs: 10 }.is_timeout());
        assert!(McpError::ConnectTimeout { server_id: "a".into(), secs: 30 }.is_timeout());
        assert!(!McpError::NotConnected("a".into()).is_timeout());
    }
}
