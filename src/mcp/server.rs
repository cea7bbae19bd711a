//! MCP server implementation using pmcp.
//!
//! Tools are served over stdio by default or over streamable HTTP. Logging must
//! stay on stderr in stdio mode so that JSON-RPC framing on stdout is untouched.

use crate::mcp::handlers::SearchDefaults;
use crate::mcp::tools::ToolRegistry;
use crate::search::SearchOrchestrator;
use async_trait::async_trait;
use pmcp::{
    server::streamable_http_server::{StreamableHttpServer, StreamableHttpServerConfig},
    Error, RequestHandlerExtra, Server, ServerCapabilities, ToolHandler, ToolInfo,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// The MCP server exposing federated literature search tools
#[derive(Debug, Clone)]
pub struct McpServer {
    server: Arc<Mutex<Server>>,
    tool_names: Vec<String>,
}

impl McpServer {
    /// Create a new MCP server backed by the given orchestrator
    pub fn new(
        orchestrator: Arc<SearchOrchestrator>,
        defaults: SearchDefaults,
    ) -> Result<Self, pmcp::Error> {
        let tools = ToolRegistry::new(orchestrator, defaults);
        let tool_names = tools.names().into_iter().map(String::from).collect();
        let server = Self::build_server_impl(tools)?;
        Ok(Self {
            server: Arc::new(Mutex::new(server)),
            tool_names,
        })
    }

    /// Names of the registered tools
    pub fn tool_names(&self) -> &[String] {
        &self.tool_names
    }

    fn build_server_impl(tools: ToolRegistry) -> Result<Server, pmcp::Error> {
        let mut builder = Server::builder()
            .name("medlit")
            .version(env!("CARGO_PKG_VERSION"))
            .capabilities(ServerCapabilities::default());

        for tool in tools.all() {
            let tool_handler = ToolWrapper {
                name: tool.name.clone(),
                description: Some(tool.description.clone()),
                input_schema: tool.input_schema.clone(),
                handler: tool.handler.clone(),
            };
            builder = builder.tool(tool_handler.name.clone(), tool_handler);
        }

        builder.build()
    }

    /// Run the server in stdio mode
    pub async fn run(&self) -> Result<(), pmcp::Error> {
        tracing::info!(tools = self.tool_names.len(), "Starting MCP server in stdio mode");

        // run_stdio() takes ownership of the Server
        let server = Arc::try_unwrap(self.server.clone())
            .map_err(|_| Error::internal("Cannot unwrap Arc - multiple references exist"))?
            .into_inner();

        server.run_stdio().await
    }

    /// Run the server in streamable HTTP mode
    pub async fn run_http(&self, addr: &str) -> Result<(SocketAddr, JoinHandle<()>), pmcp::Error> {
        tracing::info!("Starting MCP server in HTTP mode on {}", addr);

        let socket_addr: SocketAddr = addr
            .parse()
            .map_err(|e| Error::invalid_params(format!("Invalid address: {}", e)))?;

        StreamableHttpServer::new(socket_addr, self.server.clone())
            .start()
            .await
    }

    /// Run the server in streamable HTTP mode with custom configuration
    pub async fn run_http_with_config(
        &self,
        addr: &str,
        config: StreamableHttpServerConfig,
    ) -> Result<(SocketAddr, JoinHandle<()>), pmcp::Error> {
        tracing::info!("Starting MCP server in HTTP mode on {} (custom config)", addr);

        let socket_addr: SocketAddr = addr
            .parse()
            .map_err(|e| Error::invalid_params(format!("Invalid address: {}", e)))?;

        StreamableHttpServer::with_config(socket_addr, self.server.clone(), config)
            .start()
            .await
    }
}

/// Adapts our [`ToolHandler`](crate::mcp::tools::ToolHandler) to pmcp's
#[derive(Clone)]
struct ToolWrapper {
    name: String,
    description: Option<String>,
    input_schema: Value,
    handler: Arc<dyn crate::mcp::tools::ToolHandler>,
}

#[async_trait]
impl ToolHandler for ToolWrapper {
    async fn handle(&self, args: Value, _extra: RequestHandlerExtra) -> Result<Value, Error> {
        tracing::debug!(tool = %self.name, "Tool call");
        self.handler.execute(args).await.map_err(|e| {
            tracing::warn!(tool = %self.name, error = %e, "Tool call failed");
            Error::internal(&e)
        })
    }

    fn metadata(&self) -> Option<ToolInfo> {
        Some(ToolInfo::new(
            self.name.clone(),
            self.description.clone(),
            self.input_schema.clone(),
        ))
    }
}

/// Create a new MCP server instance
pub fn create_mcp_server(
    orchestrator: Arc<SearchOrchestrator>,
    defaults: SearchDefaults,
) -> Result<McpServer, pmcp::Error> {
    McpServer::new(orchestrator, defaults)
}
