use crate::{BoxTask, PostforgeError, Result, RetryExecutor, TaskOutput};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, error, info, info_span};

#[derive(Debug)]
pub struct TaskReport {
    pub name: String,
    pub output_path: Option<PathBuf>,
    pub result: Result<TaskOutput>,
}

impl TaskReport {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Independent tasks run side by side; one failing never stops the others.
pub struct Batch {
    tasks: HashMap<String, BoxTask>,
    concurrency: usize,
    execution_order: Arc<Mutex<Vec<String>>>,
}

impl Batch {
    pub fn new(tasks: Vec<BoxTask>) -> Result<Self> {
        let mut by_name = HashMap::new();
        let mut paths = HashSet::new();

        for task in tasks {
            let name = task.name().to_string();
            if let Some(path) = task.output_path() {
                if !paths.insert(path.to_path_buf()) {
                    return Err(PostforgeError::Config(format!(
                        "task {name} writes to {} which another task already targets",
                        path.display()
                    )));
                }
            }
            if by_name.insert(name.clone(), task).is_some() {
                return Err(PostforgeError::Config(format!("duplicate task name: {name}")));
            }
        }

        Ok(Self {
            tasks: by_name,
            concurrency: 4,
            execution_order: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit.max(1);
        self
    }

    pub async fn execute(&self, ctx: CancellationToken) -> HashMap<String, TaskReport> {
        self.execution_order.lock().await.clear();

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut names: Vec<&String> = self.tasks.keys().collect();
        names.sort();

        let handles: Vec<_> = names
            .iter()
            .map(|name| {
                let task = self.tasks[*name].clone();
                let ctx = ctx.clone();
                let semaphore = semaphore.clone();
                let execution_order = Arc::clone(&self.execution_order);

                tokio::spawn(async move {
                    let result = match semaphore.acquire_owned().await {
                        Ok(_permit) => run_task(ctx, task.clone()).await,
                        Err(_) => Err(PostforgeError::Cancelled("task pool closed".to_string())),
                    };
                    execution_order.lock().await.push(task.name().to_string());
                    TaskReport {
                        name: task.name().to_string(),
                        output_path: task.output_path().map(|p| p.to_path_buf()),
                        result,
                    }
                })
            })
            .collect();

        let mut reports = HashMap::new();
        for (name, joined) in names.into_iter().zip(join_all(handles).await) {
            let report = joined.unwrap_or_else(|e| TaskReport {
                name: name.clone(),
                output_path: self.tasks[name].output_path().map(|p| p.to_path_buf()),
                result: Err(PostforgeError::Cancelled(format!("task aborted: {e}"))),
            });
            reports.insert(name.clone(), report);
        }

        let succeeded = reports.values().filter(|r| r.is_success()).count();
        info!(succeeded, total = reports.len(), "batch finished");
        reports
    }

    pub async fn execution_order(&self) -> String {
        let order = self.execution_order.lock().await;
        let mut result = String::from("\n");

        for (i, step) in order.iter().enumerate() {
            result.push_str(&format!("{}. {}\n", i + 1, step));
        }

        result
    }
}

/// Full lifecycle of one task: prepare once, retry the unit of work, persist once.
pub async fn run_task(ctx: CancellationToken, task: BoxTask) -> Result<TaskOutput> {
    let span = info_span!("task", name = %task.name());
    let result = lifecycle(ctx, &task).instrument(span.clone()).await;

    if let Err(err) = &result {
        span.in_scope(|| {
            error!(kind = err.kind(), error = %err, hint = err.remediation(), "task failed");
        });
    }
    result
}

async fn lifecycle(ctx: CancellationToken, task: &BoxTask) -> Result<TaskOutput> {
    if ctx.is_cancelled() {
        return Err(PostforgeError::Cancelled(format!("task {} cancelled", task.name())));
    }

    task.pre_execution(ctx.clone()).await?;

    let executor = RetryExecutor::new(task.retry_policy()).with_span(Span::current());
    let output = executor
        .execute_with_retry(ctx.clone(), task.name(), |attempt| {
            let task = task.clone();
            let ctx = ctx.clone();
            async move { task.execute(ctx, attempt).await }
        })
        .await?;

    task.post_execution(ctx, &output).await?;
    Ok(output)
}
