use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use foundry_mcp_agent::{
    credential_from_env, Config, EnvSource, FoundryAgentsClient, McpHttpClient, Orchestrator,
};

/// Ask a Foundry-hosted agent one question, with MCP tools attached
#[derive(Parser, Debug)]
#[command(name = "foundry-mcp-agent")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Message sent to the agent
    #[arg(short, long, default_value = "What is Foundry Local?")]
    message: String,

    /// Dotenv file read before the process environment
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// Override the agent name
    #[arg(long)]
    agent_name: Option<String>,

    /// Override the agent instructions
    #[arg(long)]
    instructions: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the transcript, so logs go to stderr
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    // Load configuration
    let env = EnvSource::with_dotenv(&args.env_file)?;
    let mut config = Config::load(&env)?;

    // Apply CLI overrides
    if let Some(name) = args.agent_name {
        config.agent_name = name;
    }
    if let Some(instructions) = args.instructions {
        config.instructions = instructions;
    }

    let credential = credential_from_env(&env)?;
    tracing::info!("Using {} credential", credential.name());

    let host = FoundryAgentsClient::new(&config, credential)?;
    let tool_source = McpHttpClient::new(config.request_timeout);

    let orchestrator = Orchestrator::new(config, host, tool_source);
    let stdout = std::io::stdout();
    orchestrator.run(&args.message, &mut stdout.lock()).await?;
    Ok(())
}
