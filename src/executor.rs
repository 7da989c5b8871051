//! Task abstraction and flow composition
//!
//! A [`Task`] is a named, awaitable unit of work. A [`Flow`] composes tasks
//! with two operators:
//!
//! - [`Flow::series`] runs its children one after another, each starting only
//!   once the previous one has completed (including its writes). The first
//!   failure stops the series.
//! - [`Flow::parallel`] starts all children without waiting on each other;
//!   their completions are unordered. The first failure fails the group.

use std::sync::Arc;
use std::time::{Duration, Instant};

use console::style;
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use tracing::info;

use crate::error::{PipelineError, Result};

/// A named build step with one success/failure outcome per invocation
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self) -> BoxFuture<'_, Result<()>>;
}

pub type TaskRef = Arc<dyn Task>;

/// Result of executing a single task
#[derive(Debug)]
pub struct TaskResult {
    pub name: String,
    pub success: bool,
    pub duration: Duration,
    pub error: Option<String>,
}

/// A composition of tasks
#[derive(Clone)]
pub enum Flow {
    Task(TaskRef),
    Series(Vec<Flow>),
    Parallel(Vec<Flow>),
}

impl Flow {
    pub fn task(task: TaskRef) -> Self {
        Flow::Task(task)
    }

    pub fn series(flows: impl IntoIterator<Item = Flow>) -> Self {
        Flow::Series(flows.into_iter().collect())
    }

    pub fn parallel(flows: impl IntoIterator<Item = Flow>) -> Self {
        Flow::Parallel(flows.into_iter().collect())
    }

    /// Task names in declaration order
    pub fn task_names(&self) -> Vec<&str> {
        match self {
            Flow::Task(task) => vec![task.name()],
            Flow::Series(flows) | Flow::Parallel(flows) => {
                flows.iter().flat_map(|f| f.task_names()).collect()
            }
        }
    }

    /// Run the flow, printing each task's outcome as it completes
    pub fn run(&self) -> BoxFuture<'_, Result<Vec<TaskResult>>> {
        async move {
            match self {
                Flow::Task(task) => run_task(task.as_ref()).await.map(|r| vec![r]),
                Flow::Series(flows) => {
                    let mut results = Vec::new();
                    for flow in flows {
                        results.extend(flow.run().await?);
                    }
                    Ok(results)
                }
                Flow::Parallel(flows) => {
                    let groups = try_join_all(flows.iter().map(|f| f.run())).await?;
                    Ok(groups.into_iter().flatten().collect())
                }
            }
        }
        .boxed()
    }
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Flow::Task(task) => write!(f, "{}", task.name()),
            Flow::Series(flows) => f.debug_tuple("series").field(flows).finish(),
            Flow::Parallel(flows) => f.debug_tuple("parallel").field(flows).finish(),
        }
    }
}

async fn run_task(task: &dyn Task) -> Result<TaskResult> {
    info!(task = task.name(), "starting");
    let start = Instant::now();
    let outcome = task.run().await;

    let result = TaskResult {
        name: task.name().to_string(),
        success: outcome.is_ok(),
        duration: start.elapsed(),
        error: outcome.as_ref().err().map(PipelineError::chain_message),
    };
    print_task_result(&result);

    match outcome {
        Ok(()) => Ok(result),
        Err(e) => Err(PipelineError::TaskFailed {
            task: result.name,
            source: Box::new(e),
        }),
    }
}

/// Print result of a single task
fn print_task_result(result: &TaskResult) {
    let status = if result.success {
        style("✓").green()
    } else {
        style("✗").red()
    };

    let duration = format!("{:.2}s", result.duration.as_secs_f64());

    eprintln!(
        "{} {} {}",
        status,
        style(&result.name).bold(),
        style(duration).dim()
    );

    if let Some(error) = &result.error {
        eprintln!("  {}", style(error).red());
    }
}

/// Print execution summary
pub fn print_summary(results: &[TaskResult]) {
    let total: Duration = results.iter().map(|r| r.duration).sum();
    let succeeded = results.iter().filter(|r| r.success).count();

    eprintln!(
        "{} {} tasks completed in {:.2}s",
        style("✓").green().bold(),
        succeeded,
        total.as_secs_f64()
    );
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Records its name into a shared log each time it runs
    pub struct LogTask {
        pub name: String,
        pub log: Arc<Mutex<Vec<String>>>,
        pub delay: Duration,
        pub fail: bool,
        pub runs: AtomicUsize,
    }

    impl LogTask {
        pub fn new(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name: name.to_string(),
                log: Arc::clone(log),
                delay: Duration::ZERO,
                fail: false,
                runs: AtomicUsize::new(0),
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn failing(mut self) -> Self {
            self.fail = true;
            self
        }

        pub fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    impl Task for LogTask {
        fn name(&self) -> &str {
            &self.name
        }

        fn run(&self) -> BoxFuture<'_, Result<()>> {
            async move {
                self.log.lock().unwrap().push(format!("start:{}", self.name));
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                self.runs.fetch_add(1, Ordering::SeqCst);
                self.log.lock().unwrap().push(format!("end:{}", self.name));

                if self.fail {
                    Err(PipelineError::InvalidConfig {
                        reason: format!("{} failed", self.name),
                    })
                } else {
                    Ok(())
                }
            }
            .boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::testing::LogTask;
    use super::*;

    fn log() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn test_series_runs_in_order() {
        let log = log();
        let flow = Flow::series([
            Flow::task(Arc::new(LogTask::new("a", &log).with_delay(Duration::from_millis(20)))),
            Flow::task(Arc::new(LogTask::new("b", &log))),
            Flow::task(Arc::new(LogTask::new("c", &log))),
        ]);

        let results = flow.run().await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["start:a", "end:a", "start:b", "end:b", "start:c", "end:c"]
        );
    }

    #[tokio::test]
    async fn test_series_stops_at_first_failure() {
        let log = log();
        let flow = Flow::series([
            Flow::task(Arc::new(LogTask::new("a", &log))),
            Flow::task(Arc::new(LogTask::new("b", &log).failing())),
            Flow::task(Arc::new(LogTask::new("c", &log))),
        ]);

        let err = flow.run().await.unwrap_err();
        assert!(matches!(err, PipelineError::TaskFailed { ref task, .. } if task == "b"));
        assert!(!log.lock().unwrap().iter().any(|e| e.ends_with(":c")));
    }

    #[tokio::test]
    async fn test_parallel_starts_without_waiting() {
        let log = log();
        let flow = Flow::parallel([
            Flow::task(Arc::new(LogTask::new("slow", &log).with_delay(Duration::from_millis(50)))),
            Flow::task(Arc::new(LogTask::new("fast", &log))),
        ]);

        flow.run().await.unwrap();
        let log = log.lock().unwrap();
        let fast_end = log.iter().position(|e| e == "end:fast").unwrap();
        let slow_end = log.iter().position(|e| e == "end:slow").unwrap();
        assert_eq!(log[0], "start:slow");
        assert!(fast_end < slow_end);
    }

    #[test]
    fn test_task_names_in_declaration_order() {
        let log = log();
        let flow = Flow::series([
            Flow::series([
                Flow::task(Arc::new(LogTask::new("clean", &log))),
                Flow::task(Arc::new(LogTask::new("images", &log))),
            ]),
            Flow::parallel([
                Flow::task(Arc::new(LogTask::new("watch", &log))),
                Flow::task(Arc::new(LogTask::new("serve", &log))),
            ]),
        ]);

        assert_eq!(flow.task_names(), vec!["clean", "images", "watch", "serve"]);
    }
}
