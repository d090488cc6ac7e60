//! MCP client on top of the `rmcp` SDK
//!
//! Sessions run over the streamable-HTTP transport. The SDK owns the
//! handshake, pagination and teardown; this module only bounds each step with
//! the request timeout and maps SDK failures onto the crate's error kinds.

use std::time::Duration;

use async_trait::async_trait;
use rmcp::service::{RoleClient, RunningService, ServiceError};
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::ServiceExt;
use tracing::{debug, info};
use url::Url;

use super::{ToolConnection, ToolDescriptor, ToolSource};
use crate::error::{Error, Result};

/// Opens MCP sessions over streamable HTTP
#[derive(Debug, Clone)]
pub struct McpHttpClient {
    timeout: Duration,
}

impl McpHttpClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ToolSource for McpHttpClient {
    async fn connect(&self, endpoint: &Url) -> Result<Box<dyn ToolConnection>> {
        let transport = StreamableHttpClientTransport::from_uri(endpoint.as_str());
        let service: RunningService<RoleClient, ()> =
            tokio::time::timeout(self.timeout, ().serve(transport))
                .await
                .map_err(|_| {
                    Error::Transport(format!(
                        "MCP handshake with {} timed out after {} seconds",
                        endpoint,
                        self.timeout.as_secs()
                    ))
                })?
                .map_err(|e| {
                    Error::Transport(format!("MCP handshake with {} failed: {}", endpoint, e))
                })?;

        match service.peer_info() {
            Some(peer) => info!(
                "Connected to MCP server {} {}",
                peer.server_info.name, peer.server_info.version
            ),
            None => info!("Connected to MCP server at {}", endpoint),
        }

        Ok(Box::new(McpHttpConnection {
            service,
            timeout: self.timeout,
        }))
    }
}

/// An initialized MCP session. Dropping it without `close` still shuts the
/// SDK's service down.
pub struct McpHttpConnection {
    service: RunningService<RoleClient, ()>,
    timeout: Duration,
}

#[async_trait]
impl ToolConnection for McpHttpConnection {
    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>> {
        let tools = tokio::time::timeout(self.timeout, self.service.list_all_tools())
            .await
            .map_err(|_| Error::Transport("MCP tools/list timed out".to_string()))?
            .map_err(|e| service_error("tools/list", e))?;

        debug!("MCP server listed {} tools", tools.len());
        Ok(tools
            .into_iter()
            .map(|tool| {
                ToolDescriptor::new(
                    tool.name.to_string(),
                    tool.description.map(|d| d.to_string()).unwrap_or_default(),
                )
            })
            .collect())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let McpHttpConnection { service, .. } = *self;
        let reason = service
            .cancel()
            .await
            .map_err(|e| Error::Transport(format!("MCP session teardown failed: {}", e)))?;
        debug!("MCP session closed: {:?}", reason);
        Ok(())
    }
}

/// JSON-RPC errors and unexpected replies are the server's fault, the rest is transport
fn service_error(method: &str, err: ServiceError) -> Error {
    match err {
        ServiceError::McpError(data) => {
            Error::Protocol(format!("MCP {} failed: {}", method, data.message))
        }
        ServiceError::UnexpectedResponse => {
            Error::Protocol(format!("MCP {} returned an unexpected response", method))
        }
        other => Error::Transport(format!("MCP {} failed: {}", method, other)),
    }
}
