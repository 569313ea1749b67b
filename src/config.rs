use crate::retry::duration_secs;
use crate::{Platform, PostforgeError, Result, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime configuration, optionally read from a TOML file.
///
/// Every section has defaults, so an empty file (or no file) is valid.
/// Credentials are never read from here, only from the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session_file: PathBuf,
    pub api: ApiConfig,
    pub retry: RetryPolicy,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_file: PathBuf::from("enhanced_cofounder_session.json"),
            api: ApiConfig::default(),
            retry: RetryPolicy::default(),
            output: OutputConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub model: String,
    /// Checked in order; the first non-empty one wins.
    pub api_key_vars: Vec<String>,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.0-flash".to_string(),
            api_key_vars: vec!["GEMINI_API_KEY".to_string(), "GOOGLE_API_KEY".to_string()],
            timeout: Duration::from_secs(60),
            temperature: 0.7,
            max_output_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub backup_dir: PathBuf,
    /// Upper bound on platforms generated at the same time.
    pub concurrency: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("generated_content"),
            backup_dir: PathBuf::from("backups"),
            concurrency: 4,
        }
    }
}

impl OutputConfig {
    pub fn path_for(&self, platform: Platform) -> PathBuf {
        self.dir.join(platform.output_file_name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
    pub file_name: String,
    /// Used when neither `POSTFORGE_LOG` nor `RUST_LOG` is set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            file_name: "content_generation.log".to_string(),
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(raw).map_err(|e| PostforgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path` when given, otherwise returns the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                PostforgeError::Config(format!("config file not found: {}", path.display()))
            }
            _ => PostforgeError::io(path, e),
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.base_delay.is_zero() {
            return Err(PostforgeError::Config("retry.base_delay must be > 0".into()));
        }
        if self.retry.max_delay < self.retry.base_delay {
            return Err(PostforgeError::Config(
                "retry.max_delay must be >= retry.base_delay".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.retry.jitter) {
            return Err(PostforgeError::Config("retry.jitter must be in [0, 1)".into()));
        }
        if self.output.concurrency == 0 {
            return Err(PostforgeError::Config("output.concurrency must be >= 1".into()));
        }
        if self.api.api_key_vars.is_empty() {
            return Err(PostforgeError::Config("api.api_key_vars must not be empty".into()));
        }
        Ok(())
    }
}
