//! Configuration parsing for assetpipe.toml
//!
//! The file is optional: without one, the built-in layout (`src/` in,
//! `dist/` out) is used and the project root is the working directory.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

/// Default config file names to search for
pub const CONFIG_FILES: &[&str] = &["assetpipe.toml", ".assetpipe.toml"];

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Source and destination layout
    #[serde(default)]
    pub paths: PathsConfig,

    /// Live-reload server
    #[serde(default)]
    pub server: ServerConfig,

    /// Global settings
    #[serde(default)]
    pub settings: Settings,
}

/// Source/destination layout. Globs are relative to `src` except `scripts`,
/// which is relative to `dist`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    #[serde(default = "default_src")]
    pub src: PathBuf,

    #[serde(default = "default_dist")]
    pub dist: PathBuf,

    #[serde(default = "default_styles")]
    pub styles: String,

    #[serde(default = "default_images")]
    pub images: String,

    #[serde(default = "default_templates")]
    pub templates: String,

    /// JSON data file handed to every template
    #[serde(default = "default_data")]
    pub data: PathBuf,

    /// Glob of data files whose changes rebuild templates
    #[serde(default = "default_data_watch")]
    pub data_watch: String,

    #[serde(default = "default_scripts")]
    pub scripts: String,
}

fn default_src() -> PathBuf {
    PathBuf::from("src")
}

fn default_dist() -> PathBuf {
    PathBuf::from("dist")
}

fn default_styles() -> String {
    "sass/**/*.scss".to_string()
}

fn default_images() -> String {
    "images/**/*".to_string()
}

fn default_templates() -> String {
    "templates/**/*.tera".to_string()
}

fn default_data() -> PathBuf {
    PathBuf::from("json/data.json")
}

fn default_data_watch() -> String {
    "json/**/*.json".to_string()
}

fn default_scripts() -> String {
    "js/**/*.js".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            src: default_src(),
            dist: default_dist(),
            styles: default_styles(),
            images: default_images(),
            templates: default_templates(),
            data: default_data(),
            data_watch: default_data_watch(),
            scripts: default_scripts(),
        }
    }
}

/// Live-reload server settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Global settings for assetpipe behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Watch debounce delay in milliseconds
    #[serde(default = "default_debounce")]
    pub watch_debounce_ms: u64,
}

fn default_debounce() -> u64 {
    100
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            watch_debounce_ms: default_debounce(),
        }
    }
}

impl Config {
    /// Load configuration from the given path, or search for it upward from
    /// the current directory.
    ///
    /// Returns the config and the project root. An explicit path that does
    /// not exist is an error; finding nothing while searching is not.
    pub fn load(path: Option<&Path>) -> Result<(Self, PathBuf)> {
        let config_path = match path {
            Some(p) => {
                if p.exists() {
                    Some(p.to_path_buf())
                } else {
                    return Err(PipelineError::ConfigNotFound {
                        searched: vec![p.to_path_buf()],
                    });
                }
            }
            None => Self::find_config()?,
        };

        let Some(config_path) = config_path else {
            let root = std::env::current_dir()?;
            tracing::debug!(root = %root.display(), "no config file, using defaults");
            return Ok((Self::default(), canonical_root(root)));
        };

        let config = Self::from_file(&config_path)?;
        let root = config_path
            .parent()
            .map(Path::to_path_buf)
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(std::env::current_dir, Ok)?;

        tracing::debug!(config = %config_path.display(), root = %root.display(), "loaded config");
        Ok((config, canonical_root(root)))
    }

    /// Parse and validate a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| PipelineError::file_io(path, e))?;
        let config: Config = toml::from_str(&content).map_err(|e| PipelineError::ConfigParse {
            source: e,
            path: path.to_path_buf(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Search for config file starting from current directory
    fn find_config() -> Result<Option<PathBuf>> {
        let mut current = std::env::current_dir()?;

        loop {
            for name in CONFIG_FILES {
                let candidate = current.join(name);
                if candidate.is_file() {
                    return Ok(Some(candidate));
                }
            }

            if !current.pop() {
                return Ok(None);
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let paths = &self.paths;
        let globs = [
            ("styles", &paths.styles),
            ("images", &paths.images),
            ("templates", &paths.templates),
            ("data_watch", &paths.data_watch),
            ("scripts", &paths.scripts),
        ];

        for (key, glob) in globs {
            if glob.trim().is_empty() {
                return Err(PipelineError::InvalidConfig {
                    reason: format!("paths.{key} must not be empty"),
                });
            }
            if Path::new(glob).is_absolute() {
                return Err(PipelineError::InvalidConfig {
                    reason: format!("paths.{key} must be relative, got '{glob}'"),
                });
            }
        }

        if paths.src == paths.dist {
            return Err(PipelineError::InvalidConfig {
                reason: "paths.src and paths.dist must differ".to_string(),
            });
        }

        if self.server.port == 0 {
            return Err(PipelineError::InvalidConfig {
                reason: "server.port must be non-zero".to_string(),
            });
        }

        Ok(())
    }
}

fn canonical_root(root: PathBuf) -> PathBuf {
    root.canonicalize().unwrap_or(root)
}
