//! HTML generation from Tera templates
//!
//! The JSON data file is read again on every run, so edits to it show up on
//! the next build. Partials are loaded so other templates can include them,
//! but never rendered on their own. Every page is rendered before anything is
//! written: one bad template or a broken data file writes nothing.

use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use futures::FutureExt;
use tera::{Context, Tera};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::executor::Task;
use crate::notifier::{Notification, SharedNotifier};
use crate::paths::{is_partial, PathTable, SourceGlob};

const SUCCESS_MESSAGE: &str = "templates have been compiled.";

/// A page rendered in memory, not yet written
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub path: PathBuf,
    pub html: String,
}

/// Everything a render needs, detached from the task so it can move onto a
/// blocking thread
#[derive(Debug, Clone)]
struct TemplateSet {
    source: SourceGlob,
    dest: PathBuf,
    data_file: PathBuf,
}

pub struct TemplateTask {
    set: TemplateSet,
    notifier: SharedNotifier,
}

impl TemplateSet {
    fn render(&self) -> Result<Vec<RenderedPage>> {
        let context = load_data(&self.data_file)?;

        let mut sources = Vec::new();
        for file in self.source.collect()? {
            let text = std::fs::read_to_string(&file).map_err(|e| PipelineError::file_io(&file, e))?;
            sources.push((template_name(&self.source, &file), file, text));
        }

        let mut tera = Tera::default();
        tera.add_raw_templates(sources.iter().map(|(name, _, text)| (name.as_str(), text.as_str())))
            .map_err(|e| PipelineError::Template {
                name: self.source.to_string(),
                source: e,
            })?;

        let mut pages = Vec::new();
        for (name, file, _) in &sources {
            if is_partial(file) {
                debug!(template = %name, "skipping partial");
                continue;
            }

            let html = tera.render(name, &context).map_err(|e| PipelineError::Template {
                name: name.clone(),
                source: e,
            })?;
            pages.push(RenderedPage {
                path: output_path(&self.dest, self.source.relative_to_base(file)),
                html,
            });
        }

        Ok(pages)
    }
}

impl TemplateTask {
    pub fn new(table: &PathTable, notifier: SharedNotifier) -> Self {
        Self {
            set: TemplateSet {
                source: table.templates.source.clone(),
                dest: table.templates.dest.clone(),
                data_file: table.data_file.clone(),
            },
            notifier,
        }
    }

    /// Render every non-partial template against freshly loaded data
    pub async fn render(&self) -> Result<Vec<RenderedPage>> {
        let set = self.set.clone();
        tokio::task::spawn_blocking(move || set.render()).await?
    }

    /// Render, then write all pages. Returns the written paths.
    pub async fn build(&self) -> Result<Vec<PathBuf>> {
        let pages = self.render().await?;

        let mut written = Vec::with_capacity(pages.len());
        for page in pages {
            if let Some(parent) = page.path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| PipelineError::file_io(parent, e))?;
            }
            tokio::fs::write(&page.path, page.html)
                .await
                .map_err(|e| PipelineError::file_io(&page.path, e))?;
            info!(html = %page.path.display(), "rendered");
            written.push(page.path);
        }

        Ok(written)
    }
}

impl Task for TemplateTask {
    fn name(&self) -> &str {
        "templates"
    }

    fn run(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            let written = self.build().await?;
            if !written.is_empty() {
                self.notifier.notify(Notification::success(SUCCESS_MESSAGE));
            }
            Ok(())
        }
        .boxed()
    }
}

/// Parse the data file into a render context. The root must be an object.
pub fn load_data(path: &Path) -> Result<Context> {
    let text = std::fs::read_to_string(path).map_err(|e| PipelineError::file_io(path, e))?;
    let value: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| PipelineError::DataParse {
            path: path.to_path_buf(),
            source: e,
        })?;

    if !value.is_object() {
        return Err(PipelineError::DataNotObject {
            path: path.to_path_buf(),
        });
    }

    Context::from_value(value).map_err(|e| PipelineError::Template {
        name: path.display().to_string(),
        source: e,
    })
}

fn template_name(source: &SourceGlob, file: &Path) -> String {
    source
        .relative_to_base(file)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Destination for a template: same relative path, `.html` extension
pub fn output_path(dest: &Path, rel: &Path) -> PathBuf {
    dest.join(rel).with_extension("html")
}
