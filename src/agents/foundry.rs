//! Foundry Agents REST client

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use super::types::*;
use super::{AgentHandle, AgentHost, AgentRequest, Role, RunOptions, ThreadHandle};
use crate::auth::{AccessToken, TokenCredential};
use crate::config::Config;
use crate::error::{Error, Result};

const REQUEST_ID_HEADER: &str = "x-ms-client-request-id";
const POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// `AgentHost` backed by a Foundry project endpoint
pub struct FoundryAgentsClient {
    http_client: reqwest::Client,
    base_url: Url,
    api_version: String,
    credential: Arc<dyn TokenCredential>,
    token: Mutex<Option<AccessToken>>,
    mcp_server_label: String,
    mcp_server_url: Url,
    run_timeout: Duration,
    poll_interval: Duration,
}

impl FoundryAgentsClient {
    pub fn new(config: &Config, credential: Arc<dyn TokenCredential>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(format!("foundry-mcp-agent/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url(&config.endpoint),
            api_version: config.api_version.clone(),
            credential,
            token: Mutex::new(None),
            mcp_server_label: config.mcp_server_label.clone(),
            mcp_server_url: config.mcp_server_url.clone(),
            run_timeout: config.run_timeout,
            poll_interval: POLL_INTERVAL,
        })
    }

    /// MCP tool definition restricted to `allowed_tools`
    fn mcp_tool(&self, allowed_tools: &[String]) -> ToolDefinition {
        ToolDefinition::Mcp {
            server_label: self.mcp_server_label.clone(),
            server_url: self.mcp_server_url.to_string(),
            allowed_tools: allowed_tools.to_vec(),
        }
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| Error::Config(format!("Invalid request path {}: {}", path, e)))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("api-version", &self.api_version);
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Current bearer token, refreshed when close to expiry
    async fn bearer(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if !token.is_expired() {
                return Ok(token.token.clone());
            }
            info!("Access token expired, refreshing...");
        }

        let token = self.credential.get_token().await?;
        debug!("Using {} credential", self.credential.name());
        let value = token.token.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let bearer = format!("Bearer {}", self.bearer().await?);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer)
                .map_err(|_| Error::Credential("Access token is not a valid header".to_string()))?,
        );
        let request_id = uuid::Uuid::new_v4().to_string();
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            headers.insert(REQUEST_ID_HEADER, value);
        }
        Ok(headers)
    }

    /// Issue one API call.
    ///
    /// Connection failures are `Error::Transport`; an error status or an
    /// unreadable body is passed to `reject`, which picks the error kind for
    /// the operation at hand.
    async fn call<B, T>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
        reject: fn(String) -> Error,
    ) -> Result<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = self.url(path, query)?;
        let mut request = self
            .http_client
            .request(method.clone(), url)
            .headers(self.headers().await?);
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!("{} {}", method, path);
        let response = request
            .send()
            .await
            .map_err(|e| Error::transport(&format!("{} {}", method, path), e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(reject(match serde_json::from_str::<ApiErrorBody>(&error_text) {
                Ok(api_error) => match api_error.error.code {
                    Some(code) => format!("{} ({}): {}", status, code, api_error.error.message),
                    None => format!("{}: {}", status, api_error.error.message),
                },
                Err(_) => format!("{}: {}", status, error_text.trim()),
            }));
        }

        response
            .json()
            .await
            .map_err(|e| reject(format!("Failed to parse response of {} {}: {}", method, path, e)))
    }

    async fn run_status(&self, thread_id: &str, run_id: &str) -> Result<RunObject> {
        self.call::<(), _>(
            Method::GET,
            &format!("threads/{}/runs/{}", thread_id, run_id),
            &[],
            None,
            Error::Run,
        )
        .await
    }

    /// Poll until the run leaves the pending states, answering tool approvals
    async fn wait_for_run(
        &self,
        thread_id: &str,
        mut run: RunObject,
        allowed_tools: &[String],
    ) -> Result<RunObject> {
        loop {
            match run.status {
                status if status.is_pending() => {
                    tokio::time::sleep(self.poll_interval).await;
                    run = self.run_status(thread_id, &run.id).await?;
                }
                RunStatus::RequiresAction => {
                    let approvals = tool_approvals(&run, allowed_tools)?;
                    debug!("Answering {} tool approval requests", approvals.len());
                    run = self
                        .call(
                            Method::POST,
                            &format!("threads/{}/runs/{}/submit_tool_outputs", thread_id, run.id),
                            &[],
                            Some(&SubmitToolApprovalBody {
                                tool_approvals: approvals,
                            }),
                            Error::Run,
                        )
                        .await?;
                }
                _ => return Ok(run),
            }
        }
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) {
        let result: Result<RunObject> = self
            .call::<(), _>(
                Method::POST,
                &format!("threads/{}/runs/{}/cancel", thread_id, run_id),
                &[],
                None,
                Error::Run,
            )
            .await;
        if let Err(e) = result {
            warn!("Failed to cancel run {}: {}", run_id, e);
        }
    }
}

#[async_trait]
impl AgentHost for FoundryAgentsClient {
    async fn authenticate(&self) -> Result<()> {
        self.bearer().await.map(|_| ())
    }

    async fn create_agent(&self, request: &AgentRequest) -> Result<AgentHandle> {
        let body = CreateAgentBody {
            model: &request.model,
            name: &request.name,
            instructions: &request.instructions,
            tools: vec![self.mcp_tool(&request.tool_names)],
        };
        let agent: AgentObject = self
            .call(Method::POST, "assistants", &[], Some(&body), Error::AgentCreation)
            .await?;
        info!("Created agent {} ({})", agent.id, request.name);
        Ok(AgentHandle {
            id: agent.id,
            model: agent.model,
        })
    }

    async fn get_agent(&self, id: &str) -> Result<AgentHandle> {
        let agent: AgentObject = self
            .call::<(), _>(
                Method::GET,
                &format!("assistants/{}", id),
                &[],
                None,
                Error::AgentCreation,
            )
            .await?;
        Ok(AgentHandle {
            id: agent.id,
            model: agent.model,
        })
    }

    async fn new_thread(&self, agent: &AgentHandle) -> Result<ThreadHandle> {
        let thread: ThreadObject = self
            .call(
                Method::POST,
                "threads",
                &[],
                Some(&serde_json::json!({})),
                Error::Transport,
            )
            .await?;
        Ok(ThreadHandle {
            id: thread.id,
            agent_id: agent.id.clone(),
        })
    }

    async fn run(
        &self,
        thread: &ThreadHandle,
        user_text: &str,
        options: &RunOptions,
    ) -> Result<String> {
        let _: serde_json::Value = self
            .call(
                Method::POST,
                &format!("threads/{}/messages", thread.id),
                &[],
                Some(&CreateMessageBody {
                    role: Role::User,
                    content: user_text,
                }),
                Error::Run,
            )
            .await?;

        let body = CreateRunBody {
            assistant_id: &thread.agent_id,
            tools: vec![self.mcp_tool(&options.tools)],
            tool_resources: ToolResources {
                mcp: vec![McpToolResource {
                    server_label: self.mcp_server_label.clone(),
                    require_approval: "never",
                }],
            },
        };
        let run: RunObject = self
            .call(
                Method::POST,
                &format!("threads/{}/runs", thread.id),
                &[],
                Some(&body),
                Error::Run,
            )
            .await?;
        let run_id = run.id.clone();
        info!("Started run {} on thread {}", run_id, thread.id);

        let run = match tokio::time::timeout(
            self.run_timeout,
            self.wait_for_run(&thread.id, run, &options.tools),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                self.cancel_run(&thread.id, &run_id).await;
                return Err(Error::Run(format!(
                    "run {} did not finish within {:?}",
                    run_id, self.run_timeout
                )));
            }
        };

        check_run_outcome(&run)?;
        if let Some(usage) = run.usage {
            info!(
                "Run {} used {} prompt / {} completion tokens",
                run.id, usage.prompt_tokens, usage.completion_tokens
            );
        }

        let messages: MessageList = self
            .call::<(), _>(
                Method::GET,
                &format!("threads/{}/messages", thread.id),
                &[("order", "asc"), ("run_id", run.id.as_str())],
                None,
                Error::Run,
            )
            .await?;
        collect_reply(&messages, &run.id)
    }
}

/// Make sure relative joins append to the project path instead of replacing its last segment
fn base_url(endpoint: &Url) -> Url {
    let mut base = endpoint.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.set_query(None);
    base
}

/// Approve tool calls on the run's allow-list, deny the rest
fn tool_approvals(run: &RunObject, allowed_tools: &[String]) -> Result<Vec<ToolApproval>> {
    let calls = run
        .required_action
        .as_ref()
        .and_then(|action| action.submit_tool_approval.as_ref())
        .map(|approval| approval.tool_calls.as_slice())
        .ok_or_else(|| {
            let kind = run
                .required_action
                .as_ref()
                .map(|a| a.kind.as_str())
                .unwrap_or("none");
            Error::Run(format!("run {} requires unsupported action: {}", run.id, kind))
        })?;

    Ok(calls
        .iter()
        .map(|call| {
            let approve = call
                .name
                .as_ref()
                .is_some_and(|name| allowed_tools.contains(name));
            if !approve {
                warn!("Denying call to tool {:?} outside the allow-list", call.name);
            }
            ToolApproval {
                tool_call_id: call.id.clone(),
                approve,
            }
        })
        .collect())
}

/// Turn a terminal run into success or the matching error kind
fn check_run_outcome(run: &RunObject) -> Result<()> {
    let detail = || {
        run.last_error
            .as_ref()
            .map(|e| {
                format!(
                    "{}: {}",
                    e.code.as_deref().unwrap_or("error"),
                    e.message.as_deref().unwrap_or("no details")
                )
            })
            .unwrap_or_else(|| "no details".to_string())
    };

    match run.status {
        RunStatus::Completed => Ok(()),
        RunStatus::Failed if is_tool_failure(run) => Err(Error::ToolInvocation(format!(
            "run {} failed in a tool call: {}",
            run.id,
            detail()
        ))),
        RunStatus::Failed => Err(Error::Run(format!("run {} failed: {}", run.id, detail()))),
        status => Err(Error::Run(format!(
            "run {} ended with status {:?}: {}",
            run.id,
            status,
            detail()
        ))),
    }
}

fn is_tool_failure(run: &RunObject) -> bool {
    run.last_error.as_ref().is_some_and(|e| {
        let code = e.code.as_deref().unwrap_or("").to_ascii_lowercase();
        let message = e.message.as_deref().unwrap_or("").to_ascii_lowercase();
        code.contains("tool") || message.contains("mcp") || message.contains("tool call")
    })
}

/// The single assistant reply produced by `run_id`, in chronological order
fn collect_reply(messages: &MessageList, run_id: &str) -> Result<String> {
    let parts: Vec<String> = messages
        .data
        .iter()
        .filter(|m| m.role == Role::Assistant && m.run_id.as_deref() == Some(run_id))
        .map(|m| m.text())
        .filter(|text| !text.trim().is_empty())
        .collect();

    if parts.is_empty() {
        return Err(Error::Run(format!(
            "run {} completed without an assistant reply",
            run_id
        )));
    }
    Ok(parts.join("\n\n"))
}
