//! MCP (Model Context Protocol) implementation.

mod handlers;
pub mod server;
mod tools;

pub use handlers::{query_examples, render_result, ReturnFormat, SearchArgs, SearchDefaults};
pub use server::{create_mcp_server, McpServer};
pub use tools::{Tool, ToolHandler, ToolRegistry};
