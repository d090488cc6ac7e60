//! Tool discovery over the Model Context Protocol
//!
//! The agent never calls MCP tools from this process; the hosting service does
//! that on its side. Locally we only need to know which tools a server
//! exposes:
//!
//! - [`ToolSource`] opens a connection to a server
//! - [`ToolConnection`] lists the server's tools and is closed afterwards
//! - [`discover_tools`] wraps both so the connection is released on every path

mod client;

use std::collections::HashSet;

use async_trait::async_trait;
use url::Url;

use crate::error::Result;

pub use client::{McpHttpClient, McpHttpConnection};

/// One capability advertised by a tool server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// Whether the agent is permitted to invoke this tool
    pub allowed: bool,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            allowed: false,
        }
    }

    /// A descriptor for a tool that is known to be permitted, before discovery
    pub fn allowed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            allowed: true,
        }
    }
}

/// Factory for connections to tool servers
#[async_trait]
pub trait ToolSource: Send + Sync {
    async fn connect(&self, endpoint: &Url) -> Result<Box<dyn ToolConnection>>;
}

/// An open connection to a tool server
#[async_trait]
pub trait ToolConnection: Send {
    /// Fetch the server's tools once, in server order
    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>>;

    /// Release the connection
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Connect, list tools, and close again.
///
/// The connection is closed whether or not listing succeeded. A failure to
/// close after a successful listing is logged rather than returned, since the
/// tool list is already in hand. Each descriptor's `allowed` flag is set from
/// `allow_list`; order and duplicates are kept exactly as the server sent them.
pub async fn discover_tools(
    source: &dyn ToolSource,
    endpoint: &Url,
    allow_list: &[String],
) -> Result<Vec<ToolDescriptor>> {
    let mut connection = source.connect(endpoint).await?;
    let listed = connection.list_tools().await;
    let closed = connection.close().await;

    let mut tools = match (listed, closed) {
        (Ok(tools), Ok(())) => tools,
        (Ok(tools), Err(e)) => {
            tracing::warn!("Failed to close MCP connection to {}: {}", endpoint, e);
            tools
        }
        (Err(e), _) => return Err(e),
    };

    let allowed: HashSet<&str> = allow_list.iter().map(String::as_str).collect();
    for tool in &mut tools {
        tool.allowed = allowed.contains(tool.name.as_str());
    }

    tracing::info!(
        "Discovered {} tools at {} ({} allowed)",
        tools.len(),
        endpoint,
        tools.iter().filter(|t| t.allowed).count()
    );
    Ok(tools)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::testing::FakeToolSource;
    use pretty_assertions::assert_eq;

    fn url() -> Url {
        Url::parse("https://tools.example.test/mcp").unwrap()
    }

    #[tokio::test]
    async fn test_discover_preserves_server_order() {
        let source = FakeToolSource::new(vec![
            ToolDescriptor::new("zeta", "last letter"),
            ToolDescriptor::new("alpha", "first letter"),
            ToolDescriptor::new("zeta", "duplicate"),
        ]);

        let tools = discover_tools(&source, &url(), &["zeta".to_string()])
            .await
            .unwrap();

        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "zeta"]);
        assert_eq!(
            tools.iter().map(|t| t.allowed).collect::<Vec<_>>(),
            vec![true, false, true]
        );
        assert_eq!(source.connects(), 1);
        assert_eq!(source.closes(), 1);
    }

    #[tokio::test]
    async fn test_discover_closes_on_list_failure() {
        let source = FakeToolSource::failing_list(Error::Protocol("bad tools".to_string()));

        let err = discover_tools(&source, &url(), &[]).await.unwrap_err();

        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(source.closes(), 1);
    }

    #[tokio::test]
    async fn test_discover_connect_failure() {
        let source = FakeToolSource::unreachable();

        let err = discover_tools(&source, &url(), &[]).await.unwrap_err();

        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(source.closes(), 0);
    }
}
