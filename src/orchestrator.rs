//! One conversational turn, start to finish
//!
//! credential -> agent creation -> tool discovery -> thread -> one message
//! -> print. Each step waits for the previous one and any failure ends the
//! run.

use std::io::Write;

use tracing::{info, warn};

use crate::agents::{create_or_get_agent, open_thread, AgentDefinition, AgentHost, Message};
use crate::config::{Config, EnvSource};
use crate::error::Result;
use crate::mcp::{discover_tools, ToolDescriptor, ToolSource};

/// What a completed turn produced
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub agent: AgentDefinition,
    pub tools: Vec<ToolDescriptor>,
    pub reply: Message,
}

pub struct Orchestrator<H, T> {
    config: Config,
    host: H,
    tool_source: T,
}

impl<H: AgentHost, T: ToolSource> Orchestrator<H, T> {
    pub fn new(config: Config, host: H, tool_source: T) -> Self {
        Self {
            config,
            host,
            tool_source,
        }
    }

    /// Resolve configuration first; nothing remote is touched if that fails
    pub fn from_env(env: &EnvSource, host: H, tool_source: T) -> Result<Self> {
        Ok(Self::new(Config::load(env)?, host, tool_source))
    }

    /// Run the single turn, writing the transcript to `out`
    pub async fn run(&self, user_text: &str, out: &mut dyn Write) -> Result<TurnReport> {
        let config = &self.config;

        info!("Acquiring credential for {}", config.endpoint);
        self.host.authenticate().await?;

        info!("Creating agent {} on {}", config.agent_name, config.model_id);
        let allow_list: Vec<ToolDescriptor> = config
            .allowed_tools
            .iter()
            .map(ToolDescriptor::allowed)
            .collect();
        let agent = create_or_get_agent(
            &self.host,
            &config.model_id,
            &config.agent_name,
            &config.instructions,
            &allow_list,
        )
        .await?;
        writeln!(out, "Created agent with ID: {}", agent.id)?;

        info!("Listing tools at {}", config.mcp_server_url);
        let tools = discover_tools(
            &self.tool_source,
            &config.mcp_server_url,
            &config.allowed_tools,
        )
        .await?;
        writeln!(out, "Available tools:")?;
        for tool in &tools {
            writeln!(out, "  {}: {}", tool.name, tool.description)?;
        }
        if !tools.iter().any(|t| t.allowed) {
            warn!(
                "None of the allowed tools {:?} were offered by {}",
                config.allowed_tools, config.mcp_server_url
            );
        }

        let mut session = open_thread(&self.host, agent.clone()).await?;
        let reply = session
            .send_message(Message::user(user_text), &tools)
            .await?;
        session.close();

        writeln!(out, "{}", reply.content)?;
        out.flush()?;

        Ok(TurnReport {
            agent,
            tools,
            reply,
        })
    }
}
