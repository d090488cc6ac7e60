//! Remote agents, threads and conversation turns
//!
//! The hosting service owns agents and threads; this process only holds ids
//! and a local log of what it sent and received. [`AgentHost`] is the seam to
//! the service, [`AgentSession`] tracks one thread through its lifecycle:
//!
//! ```text
//! Created -> ThreadOpen -> (AwaitingResponse -> ThreadOpen)* -> Closed
//! ```

mod foundry;
pub mod types;

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::mcp::ToolDescriptor;

pub use foundry::FoundryAgentsClient;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// What to create on the hosting service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRequest {
    pub model: String,
    pub name: String,
    pub instructions: String,
    /// Tool names the agent may invoke
    pub tool_names: Vec<String>,
}

/// Service-side view of an agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentHandle {
    pub id: String,
    pub model: String,
}

/// Service-side view of a thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadHandle {
    pub id: String,
    pub agent_id: String,
}

/// Per-run options forwarded with a user message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Tools the agent may call during this run
    pub tools: Vec<String>,
}

/// The agent-hosting service
#[async_trait]
pub trait AgentHost: Send + Sync {
    /// Acquire the credential used for every later call
    async fn authenticate(&self) -> Result<()>;

    /// Create a new agent record. Never deduplicates.
    async fn create_agent(&self, request: &AgentRequest) -> Result<AgentHandle>;

    async fn get_agent(&self, id: &str) -> Result<AgentHandle>;

    /// Allocate a new, empty thread
    async fn new_thread(&self, agent: &AgentHandle) -> Result<ThreadHandle>;

    /// Post `user_text` and block until the agent has answered.
    ///
    /// The service may call any of `options.tools` before replying; that
    /// happens entirely on its side.
    async fn run(&self, thread: &ThreadHandle, user_text: &str, options: &RunOptions)
        -> Result<String>;
}

/// An agent as created for this session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentDefinition {
    pub id: String,
    pub model: String,
    pub name: String,
    pub instructions: String,
    pub allowed_tool_names: BTreeSet<String>,
}

/// Create an agent and retrieve it by id.
///
/// Every call creates a fresh record; nothing is looked up by name. The
/// returned allow-list is exactly the names of `tools`.
pub async fn create_or_get_agent(
    host: &dyn AgentHost,
    model: &str,
    name: &str,
    instructions: &str,
    tools: &[ToolDescriptor],
) -> Result<AgentDefinition> {
    let request = AgentRequest {
        model: model.to_string(),
        name: name.to_string(),
        instructions: instructions.to_string(),
        tool_names: tools.iter().map(|t| t.name.clone()).collect(),
    };

    let created = host.create_agent(&request).await?;
    debug!("Created agent {}, retrieving", created.id);
    let agent = host.get_agent(&created.id).await?;

    info!("Agent {} ready on model {}", agent.id, agent.model);
    Ok(AgentDefinition {
        id: agent.id,
        model: agent.model,
        name: request.name,
        instructions: request.instructions,
        allowed_tool_names: request.tool_names.into_iter().collect(),
    })
}

/// Local handle on a remote thread: its id plus everything sent and received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationThread {
    pub id: String,
    pub agent_id: String,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    ThreadOpen,
    AwaitingResponse,
    /// Terminal
    Closed,
}

/// One conversation with one agent
pub struct AgentSession<'h> {
    host: &'h dyn AgentHost,
    agent: AgentDefinition,
    thread: Option<ConversationThread>,
    state: SessionState,
}

impl<'h> AgentSession<'h> {
    pub fn new(host: &'h dyn AgentHost, agent: AgentDefinition) -> Self {
        Self {
            host,
            agent,
            thread: None,
            state: SessionState::Created,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn agent(&self) -> &AgentDefinition {
        &self.agent
    }

    pub fn thread(&self) -> Option<&ConversationThread> {
        self.thread.as_ref()
    }

    /// Allocate the remote thread. Only valid once, from `Created`.
    pub async fn open_thread(&mut self) -> Result<&ConversationThread> {
        if self.state != SessionState::Created {
            return Err(Error::Run(format!(
                "cannot open a thread in state {:?}",
                self.state
            )));
        }

        let handle = AgentHandle {
            id: self.agent.id.clone(),
            model: self.agent.model.clone(),
        };
        let thread = match self.host.new_thread(&handle).await {
            Ok(thread) => thread,
            Err(e) => {
                self.state = SessionState::Closed;
                return Err(e);
            }
        };
        info!("Opened thread {}", thread.id);

        self.state = SessionState::ThreadOpen;
        Ok(&*self.thread.insert(ConversationThread {
            id: thread.id,
            agent_id: thread.agent_id,
            messages: Vec::new(),
        }))
    }

    /// Send one user message and return the assistant's single reply.
    ///
    /// Only descriptors marked `allowed` that are also on the agent's
    /// allow-list are forwarded to the run. A failed or empty run closes the session.
    pub async fn send_message(
        &mut self,
        message: Message,
        allowed_tools: &[ToolDescriptor],
    ) -> Result<Message> {
        if self.state != SessionState::ThreadOpen {
            return Err(Error::Run(format!(
                "cannot send a message in state {:?}",
                self.state
            )));
        }
        if message.role != Role::User {
            return Err(Error::Run(format!(
                "only user messages start a run, got {:?}",
                message.role
            )));
        }
        let Some(thread) = self.thread.as_mut() else {
            return Err(Error::Run("session has no thread".to_string()));
        };

        let options = RunOptions {
            tools: forwarded_tools(&self.agent, allowed_tools),
        };
        let handle = ThreadHandle {
            id: thread.id.clone(),
            agent_id: thread.agent_id.clone(),
        };

        self.state = SessionState::AwaitingResponse;
        thread.messages.push(message.clone());
        debug!(
            "Running thread {} with tools {:?}",
            handle.id, options.tools
        );

        let reply = match self.host.run(&handle, &message.content, &options).await {
            Ok(reply) if reply.trim().is_empty() => {
                self.state = SessionState::Closed;
                return Err(Error::Run("agent returned an empty reply".to_string()));
            }
            Ok(reply) => Message::assistant(reply),
            Err(e) => {
                self.state = SessionState::Closed;
                return Err(e);
            }
        };

        thread.messages.push(reply.clone());
        self.state = SessionState::ThreadOpen;
        Ok(reply)
    }

    /// End the session. Nothing is torn down remotely.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }
}

/// Allocate a thread for `agent`, returning a session ready for `send_message`
pub async fn open_thread<'h>(
    host: &'h dyn AgentHost,
    agent: AgentDefinition,
) -> Result<AgentSession<'h>> {
    let mut session = AgentSession::new(host, agent);
    session.open_thread().await?;
    Ok(session)
}

fn forwarded_tools(agent: &AgentDefinition, tools: &[ToolDescriptor]) -> Vec<String> {
    let mut forwarded: Vec<String> = Vec::new();
    for tool in tools.iter().filter(|t| t.allowed) {
        if !agent.allowed_tool_names.contains(&tool.name) {
            warn!(
                "Tool {} is not on agent {}'s allow-list, not forwarding",
                tool.name, agent.id
            );
            continue;
        }
        if !forwarded.contains(&tool.name) {
            forwarded.push(tool.name.clone());
        }
    }
    forwarded
}
