pub mod config;
pub mod executor;
pub mod generator;
pub mod logging;
pub mod persist;
pub mod platform;
pub mod retry;
pub mod session;
pub mod task;

pub use config::Config;
pub use executor::{Batch, TaskReport};
pub use generator::{ContentGenerator, GeminiClient};
pub use persist::{AtomicWriter, SaveReport, StagedWrite};
pub use platform::Platform;
pub use retry::{AttemptOutcome, RetryExecutor, RetryPolicy, RetryState};
pub use session::{SessionState, load_session};
pub use task::{ContentArtifact, ContentTask, Task};

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub type TaskOutput = serde_json::Value;
pub type BoxTask = Arc<dyn Task>;

#[derive(Error, Debug)]
pub enum PostforgeError {
    #[error("input not found: {}", .0.display())]
    InputNotFound(PathBuf),
    #[error("input malformed: {0}")]
    InputMalformed(String),
    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("upstream overloaded: {0}")]
    UpstreamOverloaded(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("upstream server error: {0}")]
    UpstreamServerError(String),
    #[error("invalid model response: {0}")]
    InvalidResponse(String),
    #[error("I/O failure on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("cancelled: {0}")]
    Cancelled(String),
    #[error("task {task} failed after {attempts} attempts, last error: {last}")]
    RetriesExhausted {
        task: String,
        attempts: u32,
        last: Box<PostforgeError>,
    },
}

impl PostforgeError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Transient failures the retry executor absorbs up to its budget.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_)
                | Self::UpstreamOverloaded(_)
                | Self::Timeout(_)
                | Self::Network(_)
                | Self::UpstreamServerError(_)
                | Self::InvalidResponse(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::InputNotFound(_) => "InputNotFound",
            Self::InputMalformed(_) => "InputMalformed",
            Self::AuthenticationFailure(_) => "AuthenticationFailure",
            Self::RateLimited(_) => "RateLimited",
            Self::UpstreamOverloaded(_) => "UpstreamOverloaded",
            Self::Timeout(_) => "Timeout",
            Self::Network(_) => "Network",
            Self::UpstreamServerError(_) => "UpstreamServerError",
            Self::InvalidResponse(_) => "InvalidResponse",
            Self::Io { .. } => "IOFailure",
            Self::Config(_) => "Config",
            Self::Cancelled(_) => "Cancelled",
            Self::RetriesExhausted { .. } => "RetriesExhausted",
        }
    }

    /// Operator-facing hint printed next to a terminal failure.
    pub fn remediation(&self) -> &'static str {
        match self {
            Self::InputNotFound(_) => {
                "check that the session file exists and the path is correct"
            }
            Self::InputMalformed(_) => {
                "make sure the session file is UTF-8 JSON with state.startup_idea and state.current_phase"
            }
            Self::AuthenticationFailure(_) => {
                "set GEMINI_API_KEY (or GOOGLE_API_KEY) to a valid key"
            }
            Self::RateLimited(_) => "API quota exceeded; try again later or raise your quota",
            Self::UpstreamOverloaded(_) | Self::UpstreamServerError(_) => {
                "the service is temporarily unavailable; try again later"
            }
            Self::Timeout(_) | Self::Network(_) => {
                "check your network connection or raise the request timeout"
            }
            Self::InvalidResponse(_) => "the model reply could not be parsed; run again",
            Self::Io { .. } => "check that the output directory is writable and the disk has space",
            Self::Config(_) => "fix the configuration file or command-line flags",
            Self::Cancelled(_) => "the run was cancelled; start it again to finish",
            Self::RetriesExhausted { last, .. } => last.remediation(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PostforgeError>;
