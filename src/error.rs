//! Error types for assetpipe
//!
//! Uses `miette` for pretty error reporting with help text.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for assetpipe operations
#[derive(Error, Diagnostic, Debug)]
pub enum PipelineError {
    #[error("Configuration file not found")]
    #[diagnostic(
        code(assetpipe::config::not_found),
        help("Create an assetpipe.toml in your project root, or omit --config to use the defaults")
    )]
    ConfigNotFound { searched: Vec<PathBuf> },

    #[error("Failed to parse configuration at {}", path.display())]
    #[diagnostic(code(assetpipe::config::parse))]
    ConfigParse {
        #[source]
        source: toml::de::Error,
        path: PathBuf,
    },

    #[error("Invalid configuration: {reason}")]
    #[diagnostic(code(assetpipe::config::invalid))]
    InvalidConfig { reason: String },

    #[error("Invalid glob pattern '{pattern}'")]
    #[diagnostic(
        code(assetpipe::paths::glob),
        help("Check the patterns in the [paths] section")
    )]
    InvalidGlob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("I/O error on {}", path.display())]
    #[diagnostic(code(assetpipe::io::path))]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error")]
    #[diagnostic(code(assetpipe::io))]
    Io(#[from] std::io::Error),

    #[error("{}: {message}", file.display())]
    #[diagnostic(code(assetpipe::styles::compile))]
    StyleCompile { file: PathBuf, message: String },

    #[error("{}: post-processing failed: {message}", file.display())]
    #[diagnostic(code(assetpipe::styles::postprocess))]
    PostProcess { file: PathBuf, message: String },

    #[error("Invalid browser query: {message}")]
    #[diagnostic(code(assetpipe::styles::browsers))]
    BrowserQuery { message: String },

    #[error("Failed to optimize image {}", path.display())]
    #[diagnostic(code(assetpipe::images::codec))]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to encode PNG {}", path.display())]
    #[diagnostic(code(assetpipe::images::png))]
    PngEncode {
        path: PathBuf,
        #[source]
        source: png::EncodingError,
    },

    #[error("Failed to parse data file {}", path.display())]
    #[diagnostic(
        code(assetpipe::templates::data),
        help("The data file must contain a single JSON object")
    )]
    DataParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Data file {} must contain a JSON object", path.display())]
    #[diagnostic(code(assetpipe::templates::data_root))]
    DataNotObject { path: PathBuf },

    #[error("Template error in '{name}'")]
    #[diagnostic(code(assetpipe::templates::render))]
    Template {
        name: String,
        #[source]
        source: tera::Error,
    },

    #[error("Task '{task}' failed")]
    #[diagnostic(code(assetpipe::task::failed))]
    TaskFailed {
        task: String,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("Background job panicked: {message}")]
    #[diagnostic(code(assetpipe::task::join))]
    Join { message: String },

    #[error("Watch error")]
    #[diagnostic(code(assetpipe::watch))]
    Watch {
        #[source]
        source: notify::Error,
    },

    #[error("Failed to start live-reload server on {addr}")]
    #[diagnostic(
        code(assetpipe::reload::bind),
        help("Another process may be using the port; change [server] port")
    )]
    ServerBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub(crate) fn file_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::FileIo {
            path: path.into(),
            source,
        }
    }

    /// Message with the full source chain, suitable for a one-line notification.
    pub fn chain_message(&self) -> String {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            message.push_str(": ");
            message.push_str(&err.to_string());
            source = err.source();
        }
        message
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(e: tokio::task::JoinError) -> Self {
        PipelineError::Join {
            message: e.to_string(),
        }
    }
}

/// Result type alias for assetpipe operations
pub type Result<T> = std::result::Result<T, PipelineError>;
