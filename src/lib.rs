//! assetpipe - a front-end asset pipeline
//!
//! This crate provides both a CLI tool and a library for building static
//! front-end assets.
//!
//! # Features
//!
//! - **Sass** - Glob imports, vendor prefixes for a fixed browser matrix, source maps
//! - **Images** - Lossy JPEG/PNG re-encoding and SVG minification
//! - **Templates** - Tera templates rendered against a JSON data file
//! - **Watch** - Per-category rebuild chains with coalesced reruns
//! - **Live reload** - Static server that refreshes the browser after rebuilds
//!
//! # Example
//!
//! ```toml
//! # assetpipe.toml (every key is optional)
//!
//! [paths]
//! src = "src"
//! dist = "dist"
//! styles = "sass/**/*.scss"
//!
//! [server]
//! port = 3000
//! ```
//!
//! # Library Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use assetpipe::{notifier::ConsoleNotifier, Config, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (config, root) = Config::load(None)?;
//!     let pipeline = Pipeline::new(&config, &root, Arc::new(ConsoleNotifier))?;
//!
//!     pipeline.initial_build().run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod clean;
pub mod config;
pub mod error;
pub mod executor;
pub mod images;
pub mod notifier;
pub mod paths;
pub mod pipeline;
pub mod reload;
pub mod styles;
pub mod templates;
pub mod watch;

// Re-export main types
pub use config::Config;
pub use error::{PipelineError, Result};
pub use executor::{Flow, Task, TaskRef, TaskResult};
pub use paths::PathTable;
pub use pipeline::{Pipeline, Step};
