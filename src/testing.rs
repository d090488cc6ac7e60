//! Stand-ins for the remote services, for tests only
//!
//! The fakes are in-memory: the hosting service's run is a black box that
//! returns a canned reply and records what it was asked. [`StubServer`] is a
//! loopback HTTP/1.1 server for exercising the real HTTP clients.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

use crate::agents::{AgentHandle, AgentHost, AgentRequest, RunOptions, ThreadHandle};
use crate::error::{Error, Result};
use crate::mcp::{ToolConnection, ToolDescriptor, ToolSource};

/// Shared, ordered record of remote calls across fakes
pub(crate) type CallLog = Arc<Mutex<Vec<String>>>;

#[derive(Debug, Clone)]
pub(crate) struct RecordedRun {
    pub thread_id: String,
    pub user_text: String,
    pub options: RunOptions,
}

pub(crate) struct FakeAgentHost {
    reply: String,
    run_error: Mutex<Option<Error>>,
    reject_agents: bool,
    reject_credential: bool,
    offline: AtomicBool,
    next_id: AtomicUsize,
    creates: Mutex<Vec<AgentRequest>>,
    gets: Mutex<Vec<String>>,
    runs: Mutex<Vec<RecordedRun>>,
    log: CallLog,
}

impl FakeAgentHost {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            run_error: Mutex::new(None),
            reject_agents: false,
            reject_credential: false,
            offline: AtomicBool::new(false),
            next_id: AtomicUsize::new(1),
            creates: Mutex::new(Vec::new()),
            gets: Mutex::new(Vec::new()),
            runs: Mutex::new(Vec::new()),
            log: CallLog::default(),
        }
    }

    pub fn failing_run(error: Error) -> Self {
        let host = Self::new("");
        *host.run_error.lock().unwrap() = Some(error);
        host
    }

    pub fn rejecting_agents(mut self) -> Self {
        self.reject_agents = true;
        self
    }

    pub fn without_credential(mut self) -> Self {
        self.reject_credential = true;
        self
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    pub fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }

    pub fn create_requests(&self) -> Vec<AgentRequest> {
        self.creates.lock().unwrap().clone()
    }

    pub fn get_calls(&self) -> Vec<String> {
        self.gets.lock().unwrap().clone()
    }

    pub fn runs(&self) -> Vec<RecordedRun> {
        self.runs.lock().unwrap().clone()
    }

    fn record(&self, call: &str) -> Result<()> {
        self.log.lock().unwrap().push(call.to_string());
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Transport("host unreachable".to_string()));
        }
        Ok(())
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl AgentHost for FakeAgentHost {
    async fn authenticate(&self) -> Result<()> {
        self.record("authenticate")?;
        if self.reject_credential {
            return Err(Error::Credential("az login required".to_string()));
        }
        Ok(())
    }

    async fn create_agent(&self, request: &AgentRequest) -> Result<AgentHandle> {
        self.record("create_agent")?;
        if self.reject_agents {
            return Err(Error::AgentCreation(format!(
                "model {} is not deployed",
                request.model
            )));
        }
        self.creates.lock().unwrap().push(request.clone());
        Ok(AgentHandle {
            id: self.next_id("asst"),
            model: request.model.clone(),
        })
    }

    async fn get_agent(&self, id: &str) -> Result<AgentHandle> {
        self.record("get_agent")?;
        self.gets.lock().unwrap().push(id.to_string());
        let model = self
            .creates
            .lock()
            .unwrap()
            .last()
            .map(|r| r.model.clone())
            .unwrap_or_default();
        Ok(AgentHandle {
            id: id.to_string(),
            model,
        })
    }

    async fn new_thread(&self, agent: &AgentHandle) -> Result<ThreadHandle> {
        self.record("new_thread")?;
        Ok(ThreadHandle {
            id: self.next_id("thread"),
            agent_id: agent.id.clone(),
        })
    }

    async fn run(
        &self,
        thread: &ThreadHandle,
        user_text: &str,
        options: &RunOptions,
    ) -> Result<String> {
        self.record("run")?;
        self.runs.lock().unwrap().push(RecordedRun {
            thread_id: thread.id.clone(),
            user_text: user_text.to_string(),
            options: options.clone(),
        });
        if let Some(error) = self.run_error.lock().unwrap().take() {
            return Err(error);
        }
        Ok(self.reply.clone())
    }
}

pub(crate) struct FakeToolSource {
    tools: Vec<ToolDescriptor>,
    list_error: Arc<Mutex<Option<Error>>>,
    unreachable: bool,
    connects: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    log: CallLog,
}

impl FakeToolSource {
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        Self {
            tools,
            list_error: Arc::new(Mutex::new(None)),
            unreachable: false,
            connects: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
            log: CallLog::default(),
        }
    }

    pub fn failing_list(error: Error) -> Self {
        let source = Self::new(Vec::new());
        *source.list_error.lock().unwrap() = Some(error);
        source
    }

    pub fn unreachable() -> Self {
        let mut source = Self::new(Vec::new());
        source.unreachable = true;
        source
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolSource for FakeToolSource {
    async fn connect(&self, _endpoint: &Url) -> Result<Box<dyn ToolConnection>> {
        self.log.lock().unwrap().push("connect".to_string());
        if self.unreachable {
            return Err(Error::Transport("connection refused".to_string()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            tools: self.tools.clone(),
            list_error: self.list_error.clone(),
            closes: self.closes.clone(),
            log: self.log.clone(),
        }))
    }
}

struct FakeConnection {
    tools: Vec<ToolDescriptor>,
    list_error: Arc<Mutex<Option<Error>>>,
    closes: Arc<AtomicUsize>,
    log: CallLog,
}

#[async_trait]
impl ToolConnection for FakeConnection {
    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>> {
        self.log.lock().unwrap().push("list_tools".to_string());
        if let Some(error) = self.list_error.lock().unwrap().take() {
            return Err(error);
        }
        Ok(self.tools.clone())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.log.lock().unwrap().push("close".to_string());
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One request received by a [`StubServer`]
#[derive(Debug, Clone)]
pub(crate) struct StubRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    /// Header names are lowercased
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl StubRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Body parsed as JSON, `Null` when empty or malformed
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

pub(crate) struct StubResponse {
    status: u16,
    content_type: &'static str,
    body: String,
}

impl StubResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.to_string(),
        }
    }

    pub fn empty(status: u16) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: String::new(),
        }
    }

    fn encode(&self) -> Vec<u8> {
        let reason = match self.status {
            200 => "OK",
            202 => "Accepted",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            500 => "Internal Server Error",
            _ => "Status",
        };
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n{}",
            self.status,
            reason,
            self.content_type,
            self.body.len(),
            self.body
        )
        .into_bytes()
    }
}

type StubHandler = Arc<dyn Fn(&StubRequest) -> StubResponse + Send + Sync>;

/// Loopback HTTP server answering every request through a handler.
///
/// Connections are kept alive, so pooled clients can reuse them. Requests are
/// logged in arrival order.
pub(crate) struct StubServer {
    base: Url,
    requests: Arc<Mutex<Vec<StubRequest>>>,
}

impl StubServer {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&StubRequest) -> StubResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = Url::parse(&format!("http://{}/", listener.local_addr().unwrap())).unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: StubHandler = Arc::new(handler);

        let log = requests.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_connection(stream, handler.clone(), log.clone()));
            }
        });

        Self { base, requests }
    }

    /// Absolute URL of `path` on this server
    pub fn url(&self, path: &str) -> Url {
        self.base.join(path.trim_start_matches('/')).unwrap()
    }

    pub fn requests(&self) -> Vec<StubRequest> {
        self.requests.lock().unwrap().clone()
    }
}

async fn serve_connection(
    stream: TcpStream,
    handler: StubHandler,
    log: Arc<Mutex<Vec<StubRequest>>>,
) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    loop {
        let mut request_line = String::new();
        match reader.read_line(&mut request_line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default().to_string();
        let target = parts.next().unwrap_or_default().to_string();

        let mut content_length = 0usize;
        let mut headers = Vec::new();
        loop {
            let mut header = String::new();
            match reader.read_line(&mut header).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
            let header = header.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                let name = name.trim().to_ascii_lowercase();
                if name == "content-length" {
                    content_length = value.trim().parse().unwrap_or(0);
                }
                headers.push((name, value.trim().to_string()));
            }
        }

        let mut body = vec![0u8; content_length];
        if reader.read_exact(&mut body).await.is_err() {
            return;
        }

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_string(), query.to_string()),
            None => (target.clone(), String::new()),
        };
        let request = StubRequest {
            method,
            path,
            query,
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
        };
        log.lock().unwrap().push(request.clone());

        let response = handler(&request);
        if write.write_all(&response.encode()).await.is_err() {
            return;
        }
    }
}
