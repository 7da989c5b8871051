//! Removal of previously generated outputs
//!
//! Only the fixed targets below are ever touched, never the whole
//! destination tree, so unrelated files in `dist/` (scripts, fonts) survive.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::executor::Task;
use crate::paths::{PathTable, SourceGlob};

/// One thing the cleaner deletes
#[derive(Debug, Clone)]
pub enum CleanTarget {
    File(PathBuf),
    Dir(PathBuf),
    Glob(SourceGlob),
}

#[derive(Debug, Clone)]
pub struct Cleaner {
    targets: Vec<CleanTarget>,
}

impl Cleaner {
    /// Compiled stylesheet, its map, the image directory and top-level HTML
    pub fn new(table: &PathTable) -> Result<Self> {
        Ok(Self {
            targets: vec![
                CleanTarget::File(table.styles.dest.join("style.css")),
                CleanTarget::File(table.styles.dest.join("style.css.map")),
                CleanTarget::Dir(table.images.dest.clone()),
                CleanTarget::Glob(SourceGlob::new(&table.dist, "*.html")?),
            ],
        })
    }

    pub fn targets(&self) -> &[CleanTarget] {
        &self.targets
    }

    /// Delete every target that exists. Returns what was removed.
    pub async fn clean(&self) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();

        for target in &self.targets {
            match target {
                CleanTarget::File(path) => {
                    if remove(path, false).await? {
                        removed.push(path.clone());
                    }
                }
                CleanTarget::Dir(path) => {
                    if remove(path, true).await? {
                        removed.push(path.clone());
                    }
                }
                CleanTarget::Glob(glob) => {
                    for path in glob.collect()? {
                        if remove(&path, false).await? {
                            removed.push(path);
                        }
                    }
                }
            }
        }

        Ok(removed)
    }
}

/// Missing paths are not an error
async fn remove(path: &Path, dir: bool) -> Result<bool> {
    let result = if dir {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };

    match result {
        Ok(()) => {
            debug!(path = %path.display(), "removed");
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(PipelineError::file_io(path, e)),
    }
}

impl Task for Cleaner {
    fn name(&self) -> &str {
        "clean"
    }

    fn run(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            let removed = self.clean().await?;
            info!("Removed {} generated paths", removed.len());
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathsConfig;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    #[tokio::test]
    async fn test_removes_only_fixed_targets() {
        let dir = tempfile::tempdir().unwrap();
        let table = PathTable::from_config(&PathsConfig::default(), dir.path()).unwrap();
        let dist = &table.dist;

        touch(&dist.join("css/style.css"));
        touch(&dist.join("css/style.css.map"));
        touch(&dist.join("css/other.css"));
        touch(&dist.join("images/icons/a.svg"));
        touch(&dist.join("index.html"));
        touch(&dist.join("about.html"));
        touch(&dist.join("blog/post.html"));
        touch(&dist.join("js/app.js"));

        let cleaner = Cleaner::new(&table).unwrap();
        let removed = cleaner.clean().await.unwrap();

        assert_eq!(removed.len(), 5);
        assert!(!dist.join("css/style.css").exists());
        assert!(!dist.join("css/style.css.map").exists());
        assert!(!dist.join("images").exists());
        assert!(!dist.join("index.html").exists());
        assert!(!dist.join("about.html").exists());

        assert!(dist.join("css/other.css").exists());
        assert!(dist.join("blog/post.html").exists());
        assert!(dist.join("js/app.js").exists());
    }

    #[tokio::test]
    async fn test_clean_twice_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let table = PathTable::from_config(&PathsConfig::default(), dir.path()).unwrap();
        touch(&table.dist.join("index.html"));

        let cleaner = Cleaner::new(&table).unwrap();
        cleaner.run().await.unwrap();
        cleaner.run().await.unwrap();
        assert!(cleaner.clean().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_dist_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let table = PathTable::from_config(&PathsConfig::default(), dir.path()).unwrap();

        let cleaner = Cleaner::new(&table).unwrap();
        assert!(cleaner.clean().await.unwrap().is_empty());
        assert_eq!(cleaner.targets().len(), 4);
    }
}
