//! File watching and watch-rule orchestration
//!
//! Uses `notify` with debouncing to collect changed paths, then hands each
//! batch to the [`Orchestrator`], which starts the task chain of every
//! [`WatchRule`] the batch matches.
//!
//! Chains of different rules run concurrently. A single rule never runs two
//! chains at once: a change arriving mid-run marks the rule pending, and one
//! more run starts when the current one finishes, however many changes
//! arrived in between.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use console::style;
use futures::future::BoxFuture;
use futures::FutureExt;
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::executor::{Task, TaskRef};
use crate::notifier::{Notification, SharedNotifier};
use crate::paths::SourceGlob;

#[derive(Debug, Default)]
struct RunState {
    running: bool,
    pending: bool,
}

/// Binds trigger globs to an ordered chain of tasks ending in a reload
pub struct WatchRule {
    name: String,
    triggers: Vec<SourceGlob>,
    chain: Vec<TaskRef>,
    state: Mutex<RunState>,
}

impl WatchRule {
    /// `reload` is always appended as the final step
    pub fn new(
        name: impl Into<String>,
        triggers: Vec<SourceGlob>,
        steps: Vec<TaskRef>,
        reload: TaskRef,
    ) -> Self {
        let mut chain = steps;
        chain.push(reload);

        Self {
            name: name.into(),
            triggers,
            chain,
            state: Mutex::new(RunState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn triggers(&self) -> &[SourceGlob] {
        &self.triggers
    }

    pub fn chain_names(&self) -> Vec<&str> {
        self.chain.iter().map(|t| t.name()).collect()
    }

    pub fn matches(&self, path: &Path) -> bool {
        self.triggers.iter().any(|t| t.matches(path))
    }

    /// Claim the rule for a run, or mark it pending if one is in flight.
    /// Returns whether the caller should start a run.
    fn claim(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.running {
            state.pending = true;
            false
        } else {
            state.running = true;
            true
        }
    }

    /// Called after a run. Returns whether a trailing run is due.
    fn release(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.pending {
            state.pending = false;
            true
        } else {
            state.running = false;
            false
        }
    }
}

/// Dispatches changed paths to watch rules
pub struct Orchestrator {
    rules: Vec<Arc<WatchRule>>,
    notifier: SharedNotifier,
}

impl Orchestrator {
    pub fn new(rules: Vec<WatchRule>, notifier: SharedNotifier) -> Self {
        Self {
            rules: rules.into_iter().map(Arc::new).collect(),
            notifier,
        }
    }

    pub fn rules(&self) -> impl Iterator<Item = &WatchRule> {
        self.rules.iter().map(|r| r.as_ref())
    }

    /// Directories to watch: the base of every trigger glob, deduplicated
    pub fn watch_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self
            .rules
            .iter()
            .flat_map(|r| r.triggers.iter().map(SourceGlob::base_dir))
            .collect();
        dirs.sort();
        dirs.dedup();
        dirs
    }

    /// Start the chain of every rule matching any of `paths`. Returns handles
    /// for chains started now; rules already running only get marked pending.
    pub fn dispatch(&self, paths: &[PathBuf]) -> Vec<JoinHandle<()>> {
        let mut started = Vec::new();

        for rule in &self.rules {
            if !paths.iter().any(|p| rule.matches(p)) {
                continue;
            }

            if rule.claim() {
                debug!(rule = %rule.name, "starting chain");
                let rule = Arc::clone(rule);
                let notifier = Arc::clone(&self.notifier);
                started.push(tokio::spawn(async move {
                    loop {
                        run_chain(&rule, &notifier).await;
                        if !rule.release() {
                            break;
                        }
                        debug!(rule = %rule.name, "running queued change");
                    }
                }));
            } else {
                debug!(rule = %rule.name, "chain running, change queued");
            }
        }

        started
    }

    /// Consume change batches until the channel closes, then wait for
    /// in-flight chains.
    pub async fn run(&self, events: &mut mpsc::Receiver<Vec<PathBuf>>) -> Result<()> {
        let mut in_flight: Vec<JoinHandle<()>> = Vec::new();

        while let Some(changed) = events.recv().await {
            eprintln!(
                "{} Changed: {}",
                style("📝").yellow(),
                changed
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );

            in_flight.retain(|h| !h.is_finished());
            in_flight.extend(self.dispatch(&changed));
        }

        for handle in in_flight {
            handle.await?;
        }
        Ok(())
    }
}

/// Run a chain step by step. A failing step ends the chain and is reported.
async fn run_chain(rule: &WatchRule, notifier: &SharedNotifier) {
    for task in &rule.chain {
        if let Err(e) = task.run().await {
            let message = format!("{}: {}", task.name(), e.chain_message());
            warn!(rule = %rule.name, "{message}");
            notifier.notify(Notification::error(message));
            return;
        }
    }
    info!(rule = %rule.name, "rebuilt");
}

/// Debounced file-system watcher
pub struct FsWatcher {
    debouncer: Debouncer<RecommendedWatcher>,
    rx: mpsc::Receiver<Vec<PathBuf>>,
}

impl FsWatcher {
    pub fn new(debounce_ms: u64) -> Result<Self> {
        let (tx, rx) = mpsc::channel(16);

        let debouncer = new_debouncer(
            Duration::from_millis(debounce_ms),
            move |events: DebounceEventResult| match events {
                Ok(events) => {
                    let paths: Vec<PathBuf> = events.into_iter().map(|e| e.path).collect();
                    let _ = tx.blocking_send(paths);
                }
                Err(e) => warn!("watch error: {e}"),
            },
        )
        .map_err(|e| PipelineError::Watch { source: e })?;

        Ok(Self { debouncer, rx })
    }

    /// Watch each directory recursively. A directory that does not exist yet
    /// is watched through its nearest existing ancestor.
    pub fn watch(&mut self, dirs: &[PathBuf]) -> Result<()> {
        let mut watched: Vec<PathBuf> = Vec::new();

        for dir in dirs {
            let Some(target) = dir.ancestors().find(|p| p.is_dir()) else {
                warn!(dir = %dir.display(), "nothing to watch");
                continue;
            };
            if watched.iter().any(|w| target.starts_with(w)) {
                continue;
            }

            self.debouncer
                .watcher()
                .watch(target, RecursiveMode::Recursive)
                .map_err(|e| PipelineError::Watch { source: e })?;
            debug!(dir = %target.display(), "watching");
            watched.push(target.to_path_buf());
        }

        Ok(())
    }

    pub fn receiver(&mut self) -> &mut mpsc::Receiver<Vec<PathBuf>> {
        &mut self.rx
    }
}

/// Runs the orchestrator against the real file system, forever
pub struct WatchTask {
    orchestrator: Orchestrator,
    debounce_ms: u64,
}

impl WatchTask {
    pub fn new(orchestrator: Orchestrator, debounce_ms: u64) -> Self {
        Self {
            orchestrator,
            debounce_ms,
        }
    }

    async fn watch(&self) -> Result<()> {
        let mut watcher = FsWatcher::new(self.debounce_ms)?;
        watcher.watch(&self.orchestrator.watch_dirs())?;

        for rule in self.orchestrator.rules() {
            eprintln!(
                "{} Watching {} → {}",
                style("👀").cyan(),
                style(
                    rule.triggers()
                        .iter()
                        .map(|t| t.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
                .dim(),
                style(rule.chain_names().join(" → ")).bold()
            );
        }

        self.orchestrator.run(watcher.receiver()).await
    }
}

impl Task for WatchTask {
    fn name(&self) -> &str {
        "watch"
    }

    fn run(&self) -> BoxFuture<'_, Result<()>> {
        self.watch().boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::executor::testing::LogTask;
    use crate::notifier::testing::RecordingNotifier;

    struct Harness {
        log: Arc<StdMutex<Vec<String>>>,
        styles: Arc<LogTask>,
        images: Arc<LogTask>,
        templates: Arc<LogTask>,
        reload: Arc<LogTask>,
        notifier: Arc<RecordingNotifier>,
    }

    impl Harness {
        fn new() -> Self {
            let log = Arc::new(StdMutex::new(Vec::new()));
            Self {
                styles: Arc::new(LogTask::new("styles", &log)),
                images: Arc::new(
                    LogTask::new("images", &log).with_delay(Duration::from_millis(40)),
                ),
                templates: Arc::new(LogTask::new("templates", &log).failing()),
                reload: Arc::new(LogTask::new("reload", &log)),
                notifier: RecordingNotifier::shared(),
                log,
            }
        }

        fn orchestrator(&self) -> Orchestrator {
            let src = PathBuf::from("/p/src");
            let reload: TaskRef = self.reload.clone();
            let glob = |pattern: &str| SourceGlob::new(&src, pattern).unwrap();

            Orchestrator::new(
                vec![
                    WatchRule::new(
                        "styles",
                        vec![glob("sass/**/*.scss")],
                        vec![self.styles.clone() as TaskRef],
                        reload.clone(),
                    ),
                    WatchRule::new(
                        "images",
                        vec![glob("images/**/*")],
                        vec![self.images.clone() as TaskRef],
                        reload.clone(),
                    ),
                    WatchRule::new(
                        "templates",
                        vec![glob("templates/**/*.tera"), glob("json/**/*.json")],
                        vec![self.templates.clone() as TaskRef],
                        reload.clone(),
                    ),
                    WatchRule::new(
                        "scripts",
                        vec![SourceGlob::new("/p/dist", "js/**/*.js").unwrap()],
                        vec![],
                        reload,
                    ),
                ],
                self.notifier.clone(),
            )
        }

        fn entries(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    async fn join(handles: Vec<JoinHandle<()>>) {
        for h in handles {
            h.await.unwrap();
        }
    }

    #[test]
    fn test_chain_always_ends_in_reload() {
        let h = Harness::new();
        for rule in h.orchestrator().rules() {
            assert_eq!(rule.chain_names().last(), Some(&"reload"));
        }
    }

    #[tokio::test]
    async fn test_image_change_runs_only_image_chain() {
        let h = Harness::new();
        let orch = h.orchestrator();

        join(orch.dispatch(&[PathBuf::from("/p/src/images/icons/logo.png")])).await;

        assert_eq!(h.images.runs(), 1);
        assert_eq!(h.reload.runs(), 1);
        assert_eq!(h.styles.runs(), 0);
        assert_eq!(h.templates.runs(), 0);
        assert_eq!(
            h.entries(),
            vec!["start:images", "end:images", "start:reload", "end:reload"]
        );
    }

    #[tokio::test]
    async fn test_unmatched_change_runs_nothing() {
        let h = Harness::new();
        let handles = h.orchestrator().dispatch(&[PathBuf::from("/p/dist/css/style.css")]);
        assert!(handles.is_empty());
    }

    #[tokio::test]
    async fn test_script_change_only_reloads() {
        let h = Harness::new();
        join(h.orchestrator().dispatch(&[PathBuf::from("/p/dist/js/app.js")])).await;
        assert_eq!(h.entries(), vec!["start:reload", "end:reload"]);
    }

    #[tokio::test]
    async fn test_overlapping_changes_coalesce_into_one_rerun() {
        let h = Harness::new();
        let orch = h.orchestrator();
        let path = [PathBuf::from("/p/src/images/a.jpg")];

        let first = orch.dispatch(&path);
        assert_eq!(first.len(), 1);
        for _ in 0..3 {
            assert!(orch.dispatch(&path).is_empty());
        }

        join(first).await;
        assert_eq!(h.images.runs(), 2);
        assert_eq!(h.reload.runs(), 2);
    }

    #[tokio::test]
    async fn test_failing_step_reports_and_skips_reload() {
        let h = Harness::new();
        let orch = h.orchestrator();

        join(orch.dispatch(&[PathBuf::from("/p/src/json/data.json")])).await;

        assert_eq!(h.templates.runs(), 1);
        assert_eq!(h.reload.runs(), 0);
        let errors = h.notifier.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Error: templates"));

        join(orch.dispatch(&[PathBuf::from("/p/src/sass/style.scss")])).await;
        assert_eq!(h.styles.runs(), 1);
        assert_eq!(h.reload.runs(), 1);
    }

    #[tokio::test]
    async fn test_different_rules_run_concurrently() {
        let h = Harness::new();
        let orch = h.orchestrator();

        let handles = orch.dispatch(&[
            PathBuf::from("/p/src/images/a.jpg"),
            PathBuf::from("/p/src/sass/style.scss"),
        ]);
        assert_eq!(handles.len(), 2);
        join(handles).await;

        let entries = h.entries();
        let styles_done = entries.iter().position(|e| e == "end:styles").unwrap();
        let images_done = entries.iter().position(|e| e == "end:images").unwrap();
        assert!(styles_done < images_done);
    }

    #[tokio::test]
    async fn test_run_drains_channel_and_waits() {
        let h = Harness::new();
        let orch = h.orchestrator();
        let (tx, mut rx) = mpsc::channel(4);

        tx.send(vec![PathBuf::from("/p/src/images/a.jpg")]).await.unwrap();
        drop(tx);
        orch.run(&mut rx).await.unwrap();

        assert_eq!(h.images.runs(), 1);
        assert_eq!(h.reload.runs(), 1);
    }

    #[test]
    fn test_watch_dirs_are_glob_bases() {
        let h = Harness::new();
        assert_eq!(
            h.orchestrator().watch_dirs(),
            vec![
                PathBuf::from("/p/dist/js"),
                PathBuf::from("/p/src/images"),
                PathBuf::from("/p/src/json"),
                PathBuf::from("/p/src/sass"),
                PathBuf::from("/p/src/templates"),
            ]
        );
    }
}
