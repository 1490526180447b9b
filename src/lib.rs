//! MCP bridge - mediates a Model Context Protocol endpoint and a fleet of
//! long-lived editor clients connected by TCP.
//!
//! Every MCP invocation (tool, resource, prompt) is translated into a
//! correlated request to exactly one selected editor client, and that
//! client's reply flows back to the LLM. The crate also ships the
//! editor-side execution core that answers those requests.

pub mod config;
pub mod editor;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod mcp;
pub mod router;
pub mod wire;
