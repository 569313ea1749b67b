//! End-to-end runs of the platform batch against a scripted generator.

use async_trait::async_trait;
use postforge::{
    Batch, BoxTask, Config, ContentArtifact, ContentGenerator, ContentTask, Platform,
    PostforgeError, Result,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
enum Reply {
    Post(&'static str, u8),
    Overloaded,
    RateLimited,
    TimedOut,
    BadRequest,
}

impl Reply {
    fn into_result(self) -> Result<String> {
        match self {
            Reply::Post(title, score) => Ok(format!(
                r#"{{"content": {{"title": "{title}"}}, "quality_score": {score}}}"#
            )),
            Reply::Overloaded => Err(PostforgeError::UpstreamOverloaded("HTTP 503".into())),
            Reply::RateLimited => Err(PostforgeError::RateLimited("HTTP 429".into())),
            Reply::TimedOut => Err(PostforgeError::Timeout("deadline".into())),
            Reply::BadRequest => Err(PostforgeError::InputMalformed("HTTP 400".into())),
        }
    }
}

/// Answers by platform, one scripted reply per call; the last reply repeats.
struct ScriptedGenerator {
    replies: Mutex<HashMap<&'static str, Vec<Reply>>>,
    calls: Mutex<HashMap<&'static str, u32>>,
}

impl ScriptedGenerator {
    fn new(replies: Vec<(&'static str, Vec<Reply>)>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            calls: Mutex::new(HashMap::new()),
        })
    }

    fn uniform(reply: Reply) -> Arc<Self> {
        Self::new(
            ["reddit", "linkedin", "gmail", "x"]
                .into_iter()
                .map(|p| (p, vec![reply.clone()]))
                .collect(),
        )
    }

    fn calls(&self, platform: &str) -> u32 {
        self.calls.lock().unwrap().get(platform).copied().unwrap_or(0)
    }
}

fn platform_of(prompt: &str) -> &'static str {
    if prompt.contains("Reddit post") {
        "reddit"
    } else if prompt.contains("LinkedIn post") {
        "linkedin"
    } else if prompt.contains("cold email") {
        "gmail"
    } else {
        "x"
    }
}

#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let platform = platform_of(prompt);
        *self.calls.lock().unwrap().entry(platform).or_default() += 1;

        let mut replies = self.replies.lock().unwrap();
        let queue = replies.get_mut(platform).expect("scripted platform");
        let reply = if queue.len() > 1 {
            queue.remove(0)
        } else {
            queue[0].clone()
        };
        reply.into_result()
    }
}

fn config_in(dir: &Path) -> Config {
    let mut config = Config::default();
    config.session_file = dir.join("enhanced_cofounder_session.json");
    config.output.dir = dir.join("generated_content");
    config.output.backup_dir = dir.join("backups");
    config.retry.max_retries = 3;
    config.retry.base_delay = Duration::from_millis(5);
    config.retry.max_delay = Duration::from_millis(20);
    std::fs::write(
        &config.session_file,
        r#"[{"state": {
            "startup_idea": "Composting-as-a-service for offices",
            "current_phase": "market",
            "market_phase_complete": true,
            "key_market_insights": ["offices waste food", "ESG reporting"]
        }}]"#,
    )
    .unwrap();
    config
}

fn batch_for(config: &Config, generator: Arc<dyn ContentGenerator>) -> Batch {
    let tasks: Vec<BoxTask> = Platform::ALL
        .iter()
        .map(|&p| Arc::new(ContentTask::new(p, generator.clone(), config)) as BoxTask)
        .collect();
    Batch::new(tasks).unwrap()
}

fn read_artifact(config: &Config, platform: Platform) -> ContentArtifact {
    let raw = std::fs::read(config.output.path_for(platform)).unwrap();
    serde_json::from_slice(&raw).unwrap()
}

#[tokio::test]
async fn failures_stay_isolated_per_platform() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let generator = ScriptedGenerator::new(vec![
        (
            "reddit",
            vec![Reply::Overloaded, Reply::RateLimited, Reply::Post("reddit post", 88)],
        ),
        ("linkedin", vec![Reply::Post("linkedin post", 95)]),
        ("gmail", vec![Reply::BadRequest]),
        ("x", vec![Reply::TimedOut]),
    ]);

    let reports = batch_for(&config, generator.clone())
        .execute(CancellationToken::new())
        .await;

    assert!(reports["reddit"].is_success());
    assert!(reports["linkedin"].is_success());
    assert!(matches!(
        reports["gmail"].result,
        Err(PostforgeError::InputMalformed(_))
    ));
    assert!(matches!(
        reports["x"].result,
        Err(PostforgeError::RetriesExhausted { attempts: 4, .. })
    ));

    assert_eq!(generator.calls("reddit"), 3);
    assert_eq!(generator.calls("gmail"), 1);
    assert_eq!(generator.calls("x"), 4);

    let reddit = read_artifact(&config, Platform::Reddit);
    assert_eq!(reddit.quality_score, 88);
    assert_eq!(reddit.content["title"], "reddit post");
    assert!(!config.output.path_for(Platform::Gmail).exists());
    assert!(!config.output.path_for(Platform::X).exists());
}

#[tokio::test]
async fn rerun_backs_up_previous_output() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());

    let first = ScriptedGenerator::uniform(Reply::Post("first", 70));
    let reports = batch_for(&config, first).execute(CancellationToken::new()).await;
    assert!(reports.values().all(|r| r.is_success()));
    assert!(!config.output.backup_dir.exists());

    let second = ScriptedGenerator::uniform(Reply::Post("second", 90));
    let reports = batch_for(&config, second).execute(CancellationToken::new()).await;
    assert!(reports.values().all(|r| r.is_success()));

    assert_eq!(read_artifact(&config, Platform::X).content["title"], "second");

    let backups: Vec<_> = std::fs::read_dir(&config.output.backup_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(backups.len(), 4);
    let x_backup = backups
        .iter()
        .find(|p| p.file_name().unwrap().to_string_lossy().starts_with("x_content_"))
        .expect("x backup");
    let previous: ContentArtifact =
        serde_json::from_slice(&std::fs::read(x_backup).unwrap()).unwrap();
    assert_eq!(previous.content["title"], "first");
}

#[tokio::test]
async fn malformed_session_fails_every_platform_without_calls() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    std::fs::write(&config.session_file, r#"{"state": {"startup_idea": "x"}}"#).unwrap();
    let generator = ScriptedGenerator::new(vec![]);

    let reports = batch_for(&config, generator.clone())
        .execute(CancellationToken::new())
        .await;

    for report in reports.values() {
        assert!(matches!(report.result, Err(PostforgeError::InputMalformed(_))));
    }
    for platform in Platform::ALL {
        assert_eq!(generator.calls(platform.as_str()), 0);
    }
}
