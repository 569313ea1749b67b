use crate::config::Config;
use crate::generator::{ContentGenerator, parse_reply};
use crate::{AtomicWriter, Platform, PostforgeError, Result, RetryPolicy, TaskOutput, load_session};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &str;
    fn retry_policy(&self) -> Option<RetryPolicy>;

    /// Where the task persists its result. Tasks running together must not share one.
    fn output_path(&self) -> Option<&Path> {
        None
    }

    /// Runs once before the first attempt. Errors here are never retried.
    async fn pre_execution(&self, _ctx: CancellationToken) -> Result<()> {
        Ok(())
    }

    /// The retried unit of work. `attempt` is 0-indexed.
    async fn execute(&self, ctx: CancellationToken, attempt: u32) -> Result<TaskOutput>;

    /// Runs once after a successful attempt.
    async fn post_execution(&self, _ctx: CancellationToken, _output: &TaskOutput) -> Result<()> {
        Ok(())
    }
}

/// The JSON document written for each platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentArtifact {
    pub platform: Platform,
    pub content: serde_json::Value,
    pub quality_score: u8,
    pub generation_timestamp: DateTime<Utc>,
    pub version: String,
    pub generator: String,
    pub session_id: String,
}

/// Generates and saves the post for one platform from one session file.
pub struct ContentTask {
    name: String,
    platform: Platform,
    session_path: PathBuf,
    output_path: PathBuf,
    generator: Arc<dyn ContentGenerator>,
    writer: AtomicWriter,
    retry: RetryPolicy,
    prompt: RwLock<Option<String>>,
}

impl ContentTask {
    pub fn new(platform: Platform, generator: Arc<dyn ContentGenerator>, config: &Config) -> Self {
        Self {
            name: platform.as_str().to_string(),
            platform,
            session_path: config.session_file.clone(),
            output_path: config.output.path_for(platform),
            generator,
            writer: AtomicWriter::new().with_backup_dir(&config.output.backup_dir),
            retry: config.retry.clone(),
            prompt: RwLock::new(None),
        }
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = path.into();
        self
    }
}

#[async_trait]
impl Task for ContentTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        Some(self.retry.clone())
    }

    fn output_path(&self) -> Option<&Path> {
        Some(&self.output_path)
    }

    async fn pre_execution(&self, _ctx: CancellationToken) -> Result<()> {
        let session = load_session(&self.session_path).await?;
        let prompt = self.platform.build_prompt(&session);
        // every run rereads the session
        *self.prompt.write().await = Some(prompt);
        Ok(())
    }

    async fn execute(&self, _ctx: CancellationToken, attempt: u32) -> Result<TaskOutput> {
        let prompt = self.prompt.read().await.clone().ok_or_else(|| {
            PostforgeError::Config(format!("task {} executed before its session was loaded", self.name))
        })?;

        info!(
            platform = %self.platform,
            model = self.generator.model(),
            attempt = attempt + 1,
            "requesting content"
        );
        let reply = self.generator.generate(&prompt).await?;
        let generated = parse_reply(&reply)?;

        let now = Utc::now();
        let artifact = ContentArtifact {
            platform: self.platform,
            content: generated.content,
            quality_score: generated.quality_score,
            generation_timestamp: now,
            version: env!("CARGO_PKG_VERSION").to_string(),
            generator: "postforge".to_string(),
            session_id: format!("{}_{}", self.platform, now.timestamp()),
        };
        serde_json::to_value(&artifact)
            .map_err(|e| PostforgeError::InvalidResponse(format!("unserializable artifact: {e}")))
    }

    async fn post_execution(&self, _ctx: CancellationToken, output: &TaskOutput) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(output)
            .map_err(|e| PostforgeError::InvalidResponse(format!("unserializable artifact: {e}")))?;

        let writer = self.writer.clone();
        let path = self.output_path.clone();
        let report = tokio::task::spawn_blocking(move || writer.save(&path, &bytes))
            .await
            .map_err(|e| PostforgeError::io(&self.output_path, std::io::Error::other(e)))??;

        info!(
            platform = %self.platform,
            path = %report.path.display(),
            written = report.written,
            backup = ?report.backup,
            "content persisted"
        );
        Ok(())
    }
}
