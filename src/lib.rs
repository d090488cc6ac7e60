//! Foundry MCP Agent - one conversational turn against a hosted agent
//!
//! An agent is created on an Azure AI Foundry project, the tools exposed by a
//! remote MCP server are discovered, and a single user message is answered on
//! a fresh thread, with the hosting service invoking the MCP tools on the
//! agent's behalf.
//!
//! # Example
//!
//! ```no_run
//! use foundry_mcp_agent::{
//!     credential_from_env, Config, EnvSource, FoundryAgentsClient, McpHttpClient, Orchestrator,
//! };
//!
//! #[tokio::main]
//! async fn main() -> foundry_mcp_agent::Result<()> {
//!     let env = EnvSource::with_dotenv(".env".as_ref())?;
//!     let config = Config::load(&env)?;
//!
//!     let host = FoundryAgentsClient::new(&config, credential_from_env(&env)?)?;
//!     let tools = McpHttpClient::new(config.request_timeout);
//!
//!     let orchestrator = Orchestrator::new(config, host, tools);
//!     let report = orchestrator
//!         .run("What is Foundry Local?", &mut std::io::stdout())
//!         .await?;
//!     eprintln!("agent {} used {} tools", report.agent.id, report.tools.len());
//!     Ok(())
//! }
//! ```

pub mod agents;
pub mod auth;
pub mod config;
pub mod error;
pub mod mcp;
pub mod orchestrator;

#[cfg(test)]
mod testing;

// Re-export the public API
pub use agents::{
    create_or_get_agent, open_thread, AgentDefinition, AgentHost, AgentSession,
    ConversationThread, FoundryAgentsClient, Message, Role, SessionState,
};
pub use auth::{credential_from_env, AzureCliCredential, StaticTokenCredential, TokenCredential};
pub use config::{Config, EnvSource};
pub use error::{Error, Result};
pub use mcp::{discover_tools, McpHttpClient, ToolConnection, ToolDescriptor, ToolSource};
pub use orchestrator::{Orchestrator, TurnReport};
