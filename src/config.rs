//! Configuration loading and validation
//!
//! This module provides:
//! - `EnvSource` - a snapshot of environment variables taken once at startup
//! - `Config` - the immutable settings for a single run, resolved from an `EnvSource`

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

/// Project endpoint of the agent-hosting service (required)
pub const ENDPOINT_VAR: &str = "FOUNDRY_PROJECT_ENDPOINT";
/// Model deployment the agent is bound to
pub const MODEL_VAR: &str = "FOUNDRY_MODEL_DEPLOYMENT_NAME";
pub const API_VERSION_VAR: &str = "FOUNDRY_API_VERSION";
pub const REQUEST_TIMEOUT_VAR: &str = "FOUNDRY_REQUEST_TIMEOUT_SECS";
pub const RUN_TIMEOUT_VAR: &str = "FOUNDRY_RUN_TIMEOUT_SECS";
pub const MCP_URL_VAR: &str = "MCP_SERVER_URL";
pub const MCP_LABEL_VAR: &str = "MCP_SERVER_LABEL";
pub const MCP_ALLOWED_TOOLS_VAR: &str = "MCP_ALLOWED_TOOLS";

pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";
pub const DEFAULT_API_VERSION: &str = "v1";
pub const DEFAULT_MCP_URL: &str = "https://learn.microsoft.com/api/mcp";
pub const DEFAULT_MCP_LABEL: &str = "mslearnmcp";
pub const DEFAULT_ALLOWED_TOOL: &str = "searchmslearn";
pub const DEFAULT_AGENT_NAME: &str = "MSLearnMCPAgent";
pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful agent that can use MCP tools to assist users. \
     Use the available MCP tools to answer questions and perform tasks.";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 300;

/// Environment variables captured once at process start.
///
/// Values from a `.env` file are layered underneath the real process
/// environment, so an exported variable always wins. Nothing is written back
/// into the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    vars: HashMap<String, String>,
}

impl EnvSource {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Snapshot the process environment
    pub fn from_process() -> Self {
        Self::from_pairs(std::env::vars())
    }

    /// Snapshot the process environment on top of a dotenv file.
    ///
    /// A missing file is not an error; a malformed one is.
    pub fn with_dotenv(path: &Path) -> Result<Self> {
        let mut vars = HashMap::new();

        match dotenvy::from_path_iter(path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|e| {
                        Error::Config(format!("Failed to parse {}: {}", path.display(), e))
                    })?;
                    vars.insert(key, value);
                }
                tracing::debug!("Loaded {} variables from {}", vars.len(), path.display());
            }
            Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No env file at {}", path.display());
            }
            Err(e) => {
                return Err(Error::Config(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        }

        vars.extend(std::env::vars());
        Ok(Self { vars })
    }

    /// Look up a variable, treating blank values as unset
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// Settings for a single run. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Config {
    /// Project endpoint of the agent-hosting service
    pub endpoint: Url,
    /// Model deployment name
    pub model_id: String,
    pub api_version: String,
    /// Name given to the created agent record
    pub agent_name: String,
    pub instructions: String,
    /// Tool-discovery (MCP) server
    pub mcp_server_url: Url,
    /// Label the hosting service uses to refer to the MCP server
    pub mcp_server_label: String,
    /// Tool names the agent may invoke
    pub allowed_tools: Vec<String>,
    /// Upper bound for each HTTP request
    pub request_timeout: Duration,
    /// Upper bound for one conversation turn, including remote tool calls
    pub run_timeout: Duration,
}

impl Config {
    /// Resolve configuration from the given environment snapshot
    pub fn load(env: &EnvSource) -> Result<Self> {
        let endpoint = env
            .get(ENDPOINT_VAR)
            .ok_or_else(|| Error::Config(format!("{} is not set", ENDPOINT_VAR)))?;
        let endpoint = parse_url(ENDPOINT_VAR, endpoint)?;

        let mcp_server_url = parse_url(
            MCP_URL_VAR,
            env.get(MCP_URL_VAR).unwrap_or(DEFAULT_MCP_URL),
        )?;

        let allowed_tools = match env.get(MCP_ALLOWED_TOOLS_VAR) {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(String::from)
                .collect(),
            None => vec![DEFAULT_ALLOWED_TOOL.to_string()],
        };

        Ok(Self {
            endpoint,
            model_id: env.get(MODEL_VAR).unwrap_or(DEFAULT_MODEL).to_string(),
            api_version: env
                .get(API_VERSION_VAR)
                .unwrap_or(DEFAULT_API_VERSION)
                .to_string(),
            agent_name: DEFAULT_AGENT_NAME.to_string(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            mcp_server_url,
            mcp_server_label: env
                .get(MCP_LABEL_VAR)
                .unwrap_or(DEFAULT_MCP_LABEL)
                .to_string(),
            allowed_tools,
            request_timeout: parse_secs(env, REQUEST_TIMEOUT_VAR, DEFAULT_REQUEST_TIMEOUT_SECS)?,
            run_timeout: parse_secs(env, RUN_TIMEOUT_VAR, DEFAULT_RUN_TIMEOUT_SECS)?,
        })
    }
}

fn parse_url(var: &str, value: &str) -> Result<Url> {
    let url = Url::parse(value)
        .map_err(|e| Error::Config(format!("{} is not a valid URL ({}): {}", var, value, e)))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(Error::Config(format!(
            "{} must be an http(s) URL, got scheme '{}'",
            var,
            url.scheme()
        )));
    }
    Ok(url)
}

fn parse_secs(env: &EnvSource, var: &str, default: u64) -> Result<Duration> {
    match env.get(var) {
        None => Ok(Duration::from_secs(default)),
        Some(raw) => match raw.parse::<u64>() {
            Ok(0) => Err(Error::Config(format!("{} must be greater than zero", var))),
            Ok(secs) => Ok(Duration::from_secs(secs)),
            Err(_) => Err(Error::Config(format!(
                "{} must be a whole number of seconds, got '{}'",
                var, raw
            ))),
        },
    }
}
