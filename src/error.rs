//! Error taxonomy shared by every stage of a run
//!
//! Nothing here is recovered locally: each variant aborts the run and is
//! printed verbatim by the binary. The `Display` output is prefixed with the
//! kind of failure so the stage that broke is obvious from the message alone.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// A required setting is missing or malformed. Raised before any remote call.
    #[error("ConfigError: {0}")]
    Config(String),

    /// No credential could be obtained for the hosting service.
    #[error("CredentialError: {0}")]
    Credential(String),

    /// Network or connection failure talking to either remote service.
    #[error("TransportError: {0}")]
    Transport(String),

    /// The tool server answered with something we could not interpret.
    #[error("ProtocolError: {0}")]
    Protocol(String),

    /// The hosting service rejected the model or tool definition.
    #[error("AgentCreationError: {0}")]
    AgentCreation(String),

    /// The conversation turn failed remotely.
    #[error("RunError: {0}")]
    Run(String),

    /// A remote tool call failed and the hosting service did not recover.
    #[error("ToolInvocationError: {0}")]
    ToolInvocation(String),

    /// Writing results to the console failed
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Map a `reqwest` send failure. Timeouts and refused connections are
    /// both transport problems from our point of view.
    pub(crate) fn transport(context: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Transport(format!("{}: request timed out", context))
        } else {
            Error::Transport(format!("{}: {}", context, err))
        }
    }
}
