//! Model Context Protocol (MCP) server handling and JSON-RPC implementations
//!
//! Provides JSON-RPC envelope decoding and the method dispatcher.

pub mod rpc;
pub mod server;
