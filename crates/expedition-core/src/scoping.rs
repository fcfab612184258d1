//! Built-in scoping adapters.
//!
//! Scoping runs once per run: [`FixedTarget`] resolves the target output
//! count from configuration, and either [`StaticSources`] or
//! [`DirectorySources`] enumerates the sources extraction will read.

use async_trait::async_trait;

use crate::adapter::{ScopeRequest, StageAdapter, StageFailure};
use crate::domain::{SourceListing, StageKind, TargetCount};

/// Target resolver returning a configured count.
#[derive(Debug, Clone, Copy)]
pub struct FixedTarget {
    target_count: u32,
}

impl FixedTarget {
    pub fn new(target_count: u32) -> Self {
        Self { target_count }
    }
}

#[async_trait]
impl StageAdapter<ScopeRequest, TargetCount> for FixedTarget {
    fn kind(&self) -> StageKind {
        StageKind::TargetResolution
    }

    async fn execute(&self, _input: &ScopeRequest) -> Result<TargetCount, StageFailure> {
        Ok(TargetCount {
            target_count: self.target_count,
        })
    }
}

/// Source enumerator returning a configured list.
#[derive(Debug, Clone, Default)]
pub struct StaticSources {
    sources: Vec<String>,
}

impl StaticSources {
    pub fn new(sources: Vec<String>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl StageAdapter<ScopeRequest, SourceListing> for StaticSources {
    fn kind(&self) -> StageKind {
        StageKind::SourceEnumeration
    }

    async fn execute(&self, _input: &ScopeRequest) -> Result<SourceListing, StageFailure> {
        Ok(SourceListing {
            sources: self.sources.clone(),
        })
    }
}

/// Source enumerator listing the regular files directly under `source_dir`.
///
/// Hidden entries (leading `.`) are skipped; the listing is sorted so runs
/// over the same directory see the same order.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectorySources;

#[async_trait]
impl StageAdapter<ScopeRequest, SourceListing> for DirectorySources {
    fn kind(&self) -> StageKind {
        StageKind::SourceEnumeration
    }

    async fn execute(&self, input: &ScopeRequest) -> Result<SourceListing, StageFailure> {
        let dir = &input.source_dir;
        let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
            StageFailure::new(format!("cannot read source dir {}: {}", dir.display(), e))
        })?;

        let mut sources = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    return Err(StageFailure::new(format!(
                        "error listing {}: {}",
                        dir.display(),
                        e
                    )))
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if is_file {
                sources.push(entry.path().display().to_string());
            }
        }
        sources.sort();
        Ok(SourceListing { sources })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn request(dir: PathBuf) -> ScopeRequest {
        ScopeRequest {
            domain: "payments".to_string(),
            source_dir: dir,
        }
    }

    #[tokio::test]
    async fn test_directory_sources_lists_sorted_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.md"), "b").unwrap();
        std::fs::write(dir.path().join("a.md"), "a").unwrap();
        std::fs::write(dir.path().join(".hidden"), "x").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let listing = DirectorySources
            .execute(&request(dir.path().to_path_buf()))
            .await
            .unwrap();
        assert_eq!(listing.sources.len(), 2);
        assert!(listing.sources[0].ends_with("a.md"));
        assert!(listing.sources[1].ends_with("b.md"));
    }

    #[tokio::test]
    async fn test_directory_sources_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = DirectorySources
            .execute(&request(dir.path().join("missing")))
            .await
            .unwrap_err();
        assert!(err.errors[0].contains("cannot read source dir"));
    }

    #[tokio::test]
    async fn test_fixed_target_and_static_sources() {
        let req = request(PathBuf::from("."));
        let target = FixedTarget::new(12).execute(&req).await.unwrap();
        assert_eq!(target.target_count, 12);
        let sources = StaticSources::new(vec!["wiki".into()])
            .execute(&req)
            .await
            .unwrap();
        assert_eq!(sources.sources, vec!["wiki".to_string()]);
    }
}
