//! Wiring: builds every task from the configuration and composes the flows
//! the CLI runs.

use std::path::Path;
use std::sync::Arc;

use crate::clean::Cleaner;
use crate::config::Config;
use crate::error::Result;
use crate::executor::{Flow, TaskRef};
use crate::images::{ImageOptions, ImageTask};
use crate::notifier::SharedNotifier;
use crate::paths::PathTable;
use crate::reload::{ReloadServer, ReloadTask, Reloader};
use crate::styles::{StyleOptions, StyleTask};
use crate::templates::TemplateTask;
use crate::watch::{Orchestrator, WatchRule, WatchTask};

/// A build step that can be run on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Clean,
    Images,
    Styles,
    Templates,
}

pub struct Pipeline {
    table: PathTable,
    clean: TaskRef,
    images: TaskRef,
    styles: TaskRef,
    templates: TaskRef,
    watch: TaskRef,
    serve: TaskRef,
}

impl Pipeline {
    pub fn new(config: &Config, root: &Path, notifier: SharedNotifier) -> Result<Self> {
        let table = PathTable::from_config(&config.paths, root)?;

        let clean: TaskRef = Arc::new(Cleaner::new(&table)?);
        let images: TaskRef = Arc::new(ImageTask::new(&table.images, ImageOptions::default()));
        let styles: TaskRef = Arc::new(StyleTask::new(
            &table.styles,
            &StyleOptions::default(),
            Arc::clone(&notifier),
        )?);
        let templates: TaskRef = Arc::new(TemplateTask::new(&table, Arc::clone(&notifier)));

        let reloader = Reloader::new();
        let reload: TaskRef = Arc::new(ReloadTask::new(reloader.clone()));
        let serve: TaskRef = Arc::new(ReloadServer::new(
            &table.dist,
            config.server.clone(),
            reloader,
        ));

        let rules = watch_rules(&table, &styles, &images, &templates, &reload);
        let watch: TaskRef = Arc::new(WatchTask::new(
            Orchestrator::new(rules, notifier),
            config.settings.watch_debounce_ms,
        ));

        Ok(Self {
            table,
            clean,
            images,
            styles,
            templates,
            watch,
            serve,
        })
    }

    pub fn table(&self) -> &PathTable {
        &self.table
    }

    /// clean, then images, styles and templates, strictly one after another
    pub fn initial_build(&self) -> Flow {
        Flow::series([
            Flow::task(self.clean.clone()),
            Flow::task(self.images.clone()),
            Flow::task(self.styles.clone()),
            Flow::task(self.templates.clone()),
        ])
    }

    /// Initial build, then watch and serve side by side
    pub fn default_flow(&self) -> Flow {
        Flow::series([
            self.initial_build(),
            Flow::parallel([
                Flow::task(self.watch.clone()),
                Flow::task(self.serve.clone()),
            ]),
        ])
    }

    pub fn step(&self, step: Step) -> Flow {
        let task = match step {
            Step::Clean => &self.clean,
            Step::Images => &self.images,
            Step::Styles => &self.styles,
            Step::Templates => &self.templates,
        };
        Flow::task(task.clone())
    }
}

fn watch_rules(
    table: &PathTable,
    styles: &TaskRef,
    images: &TaskRef,
    templates: &TaskRef,
    reload: &TaskRef,
) -> Vec<WatchRule> {
    vec![
        WatchRule::new(
            "styles",
            vec![table.styles.source.clone()],
            vec![styles.clone()],
            reload.clone(),
        ),
        WatchRule::new(
            "images",
            vec![table.images.source.clone()],
            vec![images.clone()],
            reload.clone(),
        ),
        WatchRule::new(
            "templates",
            vec![table.templates.source.clone(), table.data_watch.clone()],
            vec![templates.clone()],
            reload.clone(),
        ),
        WatchRule::new(
            "scripts",
            vec![table.scripts.source.clone()],
            vec![],
            reload.clone(),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::notifier::testing::RecordingNotifier;

    fn pipeline(root: &Path) -> Pipeline {
        Pipeline::new(&Config::default(), root, RecordingNotifier::shared()).unwrap()
    }

    #[test]
    fn test_default_flow_order() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());

        assert_eq!(
            p.default_flow().task_names(),
            vec!["clean", "images", "styles", "templates", "watch", "serve"]
        );
        assert_eq!(
            format!("{:?}", p.default_flow()),
            "series([series([clean, images, styles, templates]), parallel([watch, serve])])"
        );
    }

    #[test]
    fn test_single_steps() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());

        assert_eq!(p.step(Step::Clean).task_names(), vec!["clean"]);
        assert_eq!(p.step(Step::Templates).task_names(), vec!["templates"]);
    }

    #[test]
    fn test_watch_rule_chains() {
        let dir = tempfile::tempdir().unwrap();
        let table = PathTable::from_config(&Config::default().paths, dir.path()).unwrap();
        let p = pipeline(dir.path());
        let reload: TaskRef = Arc::new(ReloadTask::new(Reloader::new()));

        let rules = watch_rules(&table, &p.styles, &p.images, &p.templates, &reload);
        let chains: Vec<(&str, Vec<&str>)> =
            rules.iter().map(|r| (r.name(), r.chain_names())).collect();

        assert_eq!(
            chains,
            vec![
                ("styles", vec!["styles", "reload"]),
                ("images", vec!["images", "reload"]),
                ("templates", vec!["templates", "reload"]),
                ("scripts", vec!["reload"]),
            ]
        );

        let data = dir.path().join("src/json/nav.json");
        assert!(rules[2].matches(&data));
        assert!(rules[3].matches(&dir.path().join("dist/js/app.js")));
        assert!(!rules[1].matches(&PathBuf::from("/elsewhere/images/a.png")));
    }

    #[tokio::test]
    async fn test_initial_build_on_empty_project() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("src/json/data.json");
        std::fs::create_dir_all(data.parent().unwrap()).unwrap();
        std::fs::write(&data, "{}").unwrap();

        let results = pipeline(dir.path()).initial_build().run().await.unwrap();
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.success));
    }
}
