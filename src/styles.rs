//! Sass compilation
//!
//! Each non-partial entry file goes through glob-import expansion, `grass`
//! (expanded output), `lightningcss` vendor prefixing for the browser support
//! matrix, and is written with a source map next to it.
//!
//! Failures never escape the task: they are turned into `Error:` notifications
//! so a broken stylesheet does not stop the watch loop.

use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use futures::FutureExt;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use parcel_sourcemap::SourceMap;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::executor::Task;
use crate::notifier::{Notification, SharedNotifier};
use crate::paths::{is_partial, PathEntry, SourceGlob};

/// Browsers the generated CSS must support
pub const BROWSERS: &[&str] = &[
    "last 2 versions",
    "> 5%",
    "ie 11",
    "not ie <= 10",
    "ios >= 8",
    "and_chr >= 5",
    "android >= 5",
];

const SUCCESS_MESSAGE: &str = "scss has been compiled.";

/// Post-processing options
#[derive(Debug, Clone)]
pub struct StyleOptions {
    /// browserslist queries
    pub browsers: Vec<String>,
    /// rem → px fallbacks. Always off; lightningcss has no such transform.
    pub rem: bool,
}

impl Default for StyleOptions {
    fn default() -> Self {
        Self {
            browsers: BROWSERS.iter().map(|s| s.to_string()).collect(),
            rem: false,
        }
    }
}

impl StyleOptions {
    /// Resolve the browser queries into lightningcss targets
    pub fn targets(&self) -> Result<Targets> {
        if self.rem {
            return Err(PipelineError::InvalidConfig {
                reason: "rem fallbacks are not supported".to_string(),
            });
        }

        let browsers = Browsers::from_browserslist(self.browsers.iter().map(String::as_str))
            .map_err(|e| PipelineError::BrowserQuery {
                message: e.to_string(),
            })?;

        Ok(Targets {
            browsers,
            ..Targets::default()
        })
    }
}

/// Files written for one entry stylesheet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleOutput {
    pub css: PathBuf,
    pub map: PathBuf,
}

/// Outcome of one style build
#[derive(Debug, Default)]
pub struct StyleReport {
    pub outputs: Vec<StyleOutput>,
    pub failures: Vec<PipelineError>,
}

/// Compiles every Sass entry under the styles glob
pub struct StyleTask {
    source: SourceGlob,
    dest: PathBuf,
    targets: Targets,
    notifier: SharedNotifier,
}

impl StyleTask {
    pub fn new(
        entry: &PathEntry,
        options: &StyleOptions,
        notifier: SharedNotifier,
    ) -> Result<Self> {
        Ok(Self {
            source: entry.source.clone(),
            dest: entry.dest.clone(),
            targets: options.targets()?,
            notifier,
        })
    }

    /// Compile all entries. Per-file failures are collected, not returned.
    pub async fn build(&self) -> Result<StyleReport> {
        let source = self.source.clone();
        let dest = self.dest.clone();
        let targets = self.targets.clone();

        tokio::task::spawn_blocking(move || build_all(&source, &dest, targets)).await?
    }
}

impl Task for StyleTask {
    fn name(&self) -> &str {
        "styles"
    }

    fn run(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            match self.build().await {
                Ok(report) => {
                    for failure in &report.failures {
                        warn!("{}", failure.chain_message());
                        self.notifier
                            .notify(Notification::error(failure.chain_message()));
                    }
                    if !report.outputs.is_empty() {
                        self.notifier.notify(Notification::success(SUCCESS_MESSAGE));
                    }
                }
                Err(e) => {
                    warn!("{}", e.chain_message());
                    self.notifier.notify(Notification::error(e.chain_message()));
                }
            }
            Ok(())
        }
        .boxed()
    }
}

fn build_all(source: &SourceGlob, dest: &Path, targets: Targets) -> Result<StyleReport> {
    let mut report = StyleReport::default();
    let load_root = source.base_dir();

    for file in source.collect()? {
        if is_partial(&file) {
            continue;
        }

        let rel = source.relative_to_base(&file);
        let css_path = dest.join(rel).with_extension("css");

        match compile_entry(&file, &load_root, &css_path, targets.clone()) {
            Ok(output) => {
                info!(css = %output.css.display(), "compiled");
                report.outputs.push(output);
            }
            Err(e) => report.failures.push(e),
        }
    }

    Ok(report)
}

fn compile_entry(
    file: &Path,
    load_root: &Path,
    css_path: &Path,
    targets: Targets,
) -> Result<StyleOutput> {
    let dir = file.parent().unwrap_or(load_root);
    let scss = std::fs::read_to_string(file).map_err(|e| PipelineError::file_io(file, e))?;
    let scss = expand_glob_imports(&scss, dir).map_err(|message| PipelineError::StyleCompile {
        file: file.to_path_buf(),
        message,
    })?;

    let options = grass::Options::default()
        .style(grass::OutputStyle::Expanded)
        .load_path(dir)
        .load_path(load_root);
    let css = grass::from_string(scss, &options).map_err(|e| PipelineError::StyleCompile {
        file: file.to_path_buf(),
        message: e.to_string(),
    })?;

    let file_name = css_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "style.css".to_string());
    let map_name = format!("{file_name}.map");
    let source_name = format!(
        "{}.css",
        file.strip_prefix(load_root)
            .unwrap_or(file)
            .to_string_lossy()
            .replace('\\', "/")
    );

    let (mut code, map) = postprocess(&css, &source_name, targets).map_err(|message| {
        PipelineError::PostProcess {
            file: file.to_path_buf(),
            message,
        }
    })?;
    code.push_str(&format!("\n/*# sourceMappingURL={map_name} */\n"));

    let map_path = css_path.with_file_name(&map_name);
    if let Some(parent) = css_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PipelineError::file_io(parent, e))?;
    }
    std::fs::write(css_path, code).map_err(|e| PipelineError::file_io(css_path, e))?;
    std::fs::write(&map_path, map).map_err(|e| PipelineError::file_io(&map_path, e))?;

    Ok(StyleOutput {
        css: css_path.to_path_buf(),
        map: map_path,
    })
}

/// Vendor-prefix compiled CSS and produce its source map JSON. The map points
/// at the grass output, not the Sass source.
fn postprocess(
    css: &str,
    source_name: &str,
    targets: Targets,
) -> std::result::Result<(String, String), String> {
    let mut source_map = SourceMap::new("/");
    source_map.add_source(source_name);
    source_map
        .set_source_content(0, css)
        .map_err(|e| e.to_string())?;

    let mut stylesheet = StyleSheet::parse(
        css,
        ParserOptions {
            filename: source_name.to_string(),
            ..ParserOptions::default()
        },
    )
    .map_err(|e| e.to_string())?;

    stylesheet
        .minify(MinifyOptions {
            targets: targets.clone(),
            ..MinifyOptions::default()
        })
        .map_err(|e| e.to_string())?;

    let output = stylesheet
        .to_css(PrinterOptions {
            minify: false,
            source_map: Some(&mut source_map),
            targets,
            ..PrinterOptions::default()
        })
        .map_err(|e| e.to_string())?;

    let map = source_map.to_json(None).map_err(|e| e.to_string())?;
    Ok((output.code, map))
}

/// Expand `@use`, `@forward` and `@import` directives whose target is a glob
/// into one directive per matching file, relative to `dir`.
///
/// Only one directive per line is recognised.
pub fn expand_glob_imports(source: &str, dir: &Path) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(source.len());

    for line in source.lines() {
        match parse_glob_directive(line) {
            Some(directive) => {
                let matches = glob_targets(dir, directive.target)?;
                if matches.is_empty() {
                    debug!(pattern = directive.target, "glob import matched nothing");
                }
                for target in matches {
                    out.push_str(&format!(
                        "{}{} \"{}\"{}\n",
                        directive.indent, directive.keyword, target, directive.rest
                    ));
                }
            }
            None => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }

    Ok(out)
}

struct GlobDirective<'a> {
    indent: &'a str,
    keyword: &'a str,
    target: &'a str,
    rest: &'a str,
}

fn parse_glob_directive(line: &str) -> Option<GlobDirective<'_>> {
    let trimmed = line.trim_start();
    let indent = &line[..line.len() - trimmed.len()];

    let keyword = ["@use", "@forward", "@import"]
        .into_iter()
        .find(|k| trimmed.starts_with(k))?;
    let after = trimmed[keyword.len()..].trim_start();

    let quote = after.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let body = &after[1..];
    let end = body.find(quote)?;
    let target = &body[..end];

    if !target.contains(['*', '?', '[']) {
        return None;
    }

    Some(GlobDirective {
        indent,
        keyword,
        target,
        rest: &body[end + 1..],
    })
}

fn glob_targets(dir: &Path, pattern: &str) -> std::result::Result<Vec<String>, String> {
    let full = format!(
        "{}/{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        pattern
    );
    let paths = glob::glob(&full).map_err(|e| format!("invalid glob import '{pattern}': {e}"))?;

    let mut targets = Vec::new();
    for path in paths {
        let path = path.map_err(|e| e.to_string())?;
        let is_style = path
            .extension()
            .map(|ext| ext == "scss" || ext == "sass" || ext == "css")
            .unwrap_or(false);
        if !path.is_file() || !is_style {
            continue;
        }

        let rel = path.strip_prefix(dir).unwrap_or(&path).with_extension("");
        let mut parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if let Some(last) = parts.last_mut() {
            if let Some(stripped) = last.strip_prefix('_') {
                *last = stripped.to_string();
            }
        }
        targets.push(parts.join("/"));
    }

    targets.sort();
    targets.dedup();
    Ok(targets)
}
