//! Path table: where each asset category is read from and written to
//!
//! Built once from [`PathsConfig`] and shared read-only by every task.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};
use walkdir::WalkDir;

use crate::config::PathsConfig;
use crate::error::{PipelineError, Result};

/// Logical asset category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Styles,
    Images,
    Templates,
    Scripts,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Styles,
        Category::Images,
        Category::Templates,
        Category::Scripts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Styles => "styles",
            Category::Images => "images",
            Category::Templates => "templates",
            Category::Scripts => "scripts",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A glob pattern anchored at a root directory
#[derive(Debug, Clone)]
pub struct SourceGlob {
    root: PathBuf,
    pattern: String,
    matcher: GlobMatcher,
}

impl SourceGlob {
    /// `*` does not cross directory boundaries; use `**` for that.
    pub fn new(root: impl Into<PathBuf>, pattern: &str) -> Result<Self> {
        let matcher = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| PipelineError::InvalidGlob {
                pattern: pattern.to_string(),
                source: e,
            })?
            .compile_matcher();

        Ok(Self {
            root: root.into(),
            pattern: pattern.to_string(),
            matcher,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deepest directory that contains every possible match
    pub fn base_dir(&self) -> PathBuf {
        self.root.join(literal_prefix(&self.pattern))
    }

    /// Whether `path` (absolute, or relative to the root) matches
    pub fn matches(&self, path: &Path) -> bool {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        self.matcher.is_match(rel)
    }

    /// Path of a match relative to [`base_dir`](Self::base_dir), used to mirror
    /// source structure into a destination.
    pub fn relative_to_base<'a>(&self, path: &'a Path) -> &'a Path {
        let base = self.base_dir();
        path.strip_prefix(&base)
            .or_else(|_| path.strip_prefix(&self.root))
            .unwrap_or(path)
    }

    /// All files currently matching, sorted. A missing base directory yields
    /// an empty list.
    pub fn collect(&self) -> Result<Vec<PathBuf>> {
        let base = self.base_dir();
        if !base.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&base).follow_links(true) {
            let entry = entry.map_err(|e| PipelineError::file_io(&base, e.into()))?;
            if entry.file_type().is_file() && self.matches(entry.path()) {
                files.push(entry.into_path());
            }
        }

        files.sort();
        Ok(files)
    }
}

impl fmt::Display for SourceGlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root.join(&self.pattern).display())
    }
}

/// Leading path components of a glob that contain no metacharacters
pub fn literal_prefix(pattern: &str) -> PathBuf {
    let mut prefix = PathBuf::new();
    let components: Vec<Component<'_>> = Path::new(pattern).components().collect();

    // The last component is a file pattern even when it is literal.
    let dirs = components.len().saturating_sub(1);
    for component in &components[..dirs] {
        let text = component.as_os_str().to_string_lossy();
        if text.contains(['*', '?', '[', '{']) {
            break;
        }
        prefix.push(component);
    }

    prefix
}

/// Partials start with an underscore and are only ever included by other
/// sources, never built on their own.
pub fn is_partial(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('_'))
        .unwrap_or(false)
}

/// One row of the path table
#[derive(Debug, Clone)]
pub struct PathEntry {
    pub category: Category,
    pub source: SourceGlob,
    pub dest: PathBuf,
}

/// Immutable source/destination layout for one project
#[derive(Debug, Clone)]
pub struct PathTable {
    pub root: PathBuf,
    pub src: PathBuf,
    pub dist: PathBuf,
    pub styles: PathEntry,
    pub images: PathEntry,
    pub templates: PathEntry,
    pub scripts: PathEntry,
    /// JSON data handed to templates
    pub data_file: PathBuf,
    /// Data files that also trigger a template rebuild
    pub data_watch: SourceGlob,
}

impl PathTable {
    /// Resolve the configured layout against the project root
    pub fn from_config(paths: &PathsConfig, root: &Path) -> Result<Self> {
        let src = root.join(&paths.src);
        let dist = root.join(&paths.dist);

        Ok(Self {
            styles: PathEntry {
                category: Category::Styles,
                source: SourceGlob::new(&src, &paths.styles)?,
                dest: dist.join("css"),
            },
            images: PathEntry {
                category: Category::Images,
                source: SourceGlob::new(&src, &paths.images)?,
                dest: dist.join("images"),
            },
            templates: PathEntry {
                category: Category::Templates,
                source: SourceGlob::new(&src, &paths.templates)?,
                dest: dist.clone(),
            },
            scripts: PathEntry {
                category: Category::Scripts,
                source: SourceGlob::new(&dist, &paths.scripts)?,
                dest: dist.join("js"),
            },
            data_file: src.join(&paths.data),
            data_watch: SourceGlob::new(&src, &paths.data_watch)?,
            root: root.to_path_buf(),
            src,
            dist,
        })
    }

    pub fn entry(&self, category: Category) -> &PathEntry {
        match category {
            Category::Styles => &self.styles,
            Category::Images => &self.images,
            Category::Templates => &self.templates,
            Category::Scripts => &self.scripts,
        }
    }
}
