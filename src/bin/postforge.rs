use anyhow::Context;
use clap::{Parser, Subcommand};
use postforge::{
    Batch, BoxTask, Config, ContentGenerator, ContentTask, GeminiClient, Platform, PostforgeError,
    load_session, logging,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "postforge")]
#[command(about = "Generate social-media posts from a co-founder session file", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "POSTFORGE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Session JSON file to read
    #[arg(short, long, env = "POSTFORGE_SESSION", global = true)]
    session: Option<PathBuf>,

    /// Directory for generated content
    #[arg(long, env = "POSTFORGE_OUTPUT_DIR", global = true)]
    output_dir: Option<PathBuf>,

    /// Directory for backups of replaced content
    #[arg(long, env = "POSTFORGE_BACKUP_DIR", global = true)]
    backup_dir: Option<PathBuf>,

    /// Retries after the first attempt
    #[arg(long, env = "POSTFORGE_MAX_RETRIES", global = true)]
    max_retries: Option<u32>,

    /// First backoff delay in seconds
    #[arg(long, env = "POSTFORGE_BASE_DELAY", global = true)]
    base_delay: Option<f64>,

    /// Backoff ceiling in seconds
    #[arg(long, env = "POSTFORGE_MAX_DELAY", global = true)]
    max_delay: Option<f64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate content for one or more platforms
    Generate {
        /// Platforms to generate (repeatable)
        #[arg(short, long, value_enum, required_unless_present = "all")]
        platform: Vec<Platform>,

        /// Generate every platform
        #[arg(long, conflicts_with = "platform")]
        all: bool,

        /// Output file, only valid with a single platform
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate the session file and credentials without calling the API
    Check,
}

impl Cli {
    fn apply(&self, config: &mut Config) -> anyhow::Result<()> {
        if let Some(session) = &self.session {
            config.session_file = session.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output.dir = dir.clone();
        }
        if let Some(dir) = &self.backup_dir {
            config.output.backup_dir = dir.clone();
        }
        if let Some(max_retries) = self.max_retries {
            config.retry.max_retries = max_retries;
        }
        if let Some(secs) = self.base_delay {
            config.retry.base_delay = std::time::Duration::try_from_secs_f64(secs)
                .context("--base-delay must be a non-negative number of seconds")?;
        }
        if let Some(secs) = self.max_delay {
            config.retry.max_delay = std::time::Duration::try_from_secs_f64(secs)
                .context("--max-delay must be a non-negative number of seconds")?;
        }
        config.validate()?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref())
        .map_err(anyhow::Error::from)
        .and_then(|mut config| cli.apply(&mut config).map(|_| config))
    {
        Ok(config) => config,
        Err(e) => return report_fatal(&e),
    };

    let _guard = match logging::init(&config.logging) {
        Ok(guard) => guard,
        Err(e) => return report_fatal(&e.into()),
    };

    match run(cli.command, config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => report_fatal(&e),
    }
}

async fn run(command: Commands, config: Config) -> anyhow::Result<bool> {
    match command {
        Commands::Check => check(&config).await,
        Commands::Generate {
            platform,
            all,
            output,
        } => {
            let platforms = if all { Platform::ALL.to_vec() } else { platform };
            generate(&config, platforms, output).await
        }
    }
}

async fn check(config: &Config) -> anyhow::Result<bool> {
    let session = load_session(&config.session_file).await?;
    println!(
        "session: '{}' in '{}' phase",
        session.startup_idea, session.current_phase
    );

    GeminiClient::from_env(&config.api)?;
    println!("credentials: found ({})", config.api.api_key_vars.join(" or "));
    println!("model: {}", config.api.model);
    Ok(true)
}

async fn generate(
    config: &Config,
    mut platforms: Vec<Platform>,
    output: Option<PathBuf>,
) -> anyhow::Result<bool> {
    platforms.sort_by_key(|p| p.as_str());
    platforms.dedup();
    if output.is_some() && platforms.len() != 1 {
        anyhow::bail!(PostforgeError::Config(
            "--output can only be used with a single platform".to_string()
        ));
    }

    // a missing key is fatal before any attempt is made
    let generator: Arc<dyn ContentGenerator> = Arc::new(GeminiClient::from_env(&config.api)?);

    let tasks: Vec<BoxTask> = platforms
        .iter()
        .map(|&platform| {
            let task = ContentTask::new(platform, generator.clone(), config);
            let task = match &output {
                Some(path) => task.with_output_path(path),
                None => task,
            };
            Arc::new(task) as BoxTask
        })
        .collect();

    let batch = Batch::new(tasks)?.with_concurrency(config.output.concurrency);

    let ctx = CancellationToken::new();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            canceller.cancel();
        }
    });

    info!(platforms = ?platforms, session = %config.session_file.display(), "starting generation");
    let reports = batch.execute(ctx).await;

    let mut failed = 0;
    for platform in &platforms {
        let Some(report) = reports.get(platform.as_str()) else {
            continue;
        };
        match &report.result {
            Ok(_) => {
                let path = report
                    .output_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                println!("ok      {platform:<9} {path}");
            }
            Err(e) => {
                failed += 1;
                println!("failed  {platform:<9} [{}] {e}", e.kind());
                println!("        hint: {}", e.remediation());
            }
        }
    }
    println!(
        "{}/{} platforms generated",
        platforms.len() - failed,
        platforms.len()
    );
    println!("completion order:{}", batch.execution_order().await);

    Ok(failed == 0)
}

fn report_fatal(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<PostforgeError>() {
        Some(e) => {
            eprintln!("error [{}]: {err:#}", e.kind());
            eprintln!("hint: {}", e.remediation());
            match e {
                PostforgeError::Config(_) => ExitCode::from(2),
                PostforgeError::AuthenticationFailure(_) => ExitCode::from(3),
                PostforgeError::InputNotFound(_) | PostforgeError::InputMalformed(_) => {
                    ExitCode::from(4)
                }
                _ => ExitCode::from(1),
            }
        }
        None => {
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}
