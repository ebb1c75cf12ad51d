//! MCP (Model Context Protocol) client side.
//!
//! **Transport** (`transport`): subprocess stdio or streamable HTTP channel.
//!
//! **Client** (`McpClient`): JSON-RPC framing, handshake, typed `list*` /
//! `tools/call` / `resources/read` / `prompts/get` operations.
//!
//! **Pool** (`ConnectionPool`): the one shared registry of live connections.
//!
//! **Gateway** (`McpGateway`): action dispatch + uniform error envelope for the
//! management endpoint and the chat bridge.
//!
//! Protocol: JSON-RPC 2.0, MCP revision 2024-11-05.

pub mod client;
pub mod error;
pub mod gateway;
pub mod pool;
pub mod transport;
pub mod types;

pub use client::{ClientOptions, McpClient};
pub use error::McpError;
pub use gateway::{ActionRequest, GatewayError, McpAction, McpGateway};
pub use pool::{ActiveConnection, ConnectionPool};
pub use types::{ConnectionState, ConnectionStatus, ServerDescriptor, TransportKind};
