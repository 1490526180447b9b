//! MCP (Model Context Protocol) endpoint
//!
//! The LLM-facing side of the bridge: JSON-RPC 2.0 over a line-oriented
//! transport (stdio is the reference transport), exposing three surfaces:
//! - Tools: model-invoked actions
//! - Resources: application-fetched data, by exact URI or URI template
//! - Prompts: user-selected templates
//!
//! Registration happens through [`McpServer`]; the handler registry wires
//! every registered surface to a routed editor request.

mod server;
mod transport;
mod types;

pub use server::{match_uri_template, McpServer};
pub use transport::{McpMessage, NullTransport, StdioTransport, Transport};
pub use types::*;
