//! Building, persisting and loading the retrieval artifacts.
//!
//! The artifact cache is a single file written atomically (temp file then
//! rename). A rebuild holds `<cache_path>.lock` for its whole run; a second
//! rebuild started meanwhile fails instead of racing on the cache file.
//! A failed build never touches the existing cache.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use phaply_core::{
    ArtifactBuilder, BuildError, BuildReport, CorpusLoader, RetrievalArtifacts, Segmenter,
};

use crate::config::Config;
use crate::db;
use crate::document_store::SqliteDocumentStore;
use crate::tokenizer::build_counter;

/// Held while a rebuild runs; removes the lock file on drop.
pub struct RebuildLock {
    path: PathBuf,
}

impl RebuildLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Self {
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => bail!(
                "Another rebuild is running (lock file {} exists). \
                 Remove it if no rebuild is in progress.",
                path.display()
            ),
            Err(e) => Err(e).with_context(|| format!("Failed to create lock file {}", path.display())),
        }
    }
}

impl Drop for RebuildLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Built-in lexicon plus the configured dictionary file, if any. Only
/// read at build time; the result is stored in the artifacts.
pub fn load_segmenter(config: &Config) -> Result<Segmenter> {
    let segmenter = Segmenter::new();
    match &config.segmenter.dictionary_path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read segmenter dictionary: {}", path.display()))?;
            Ok(segmenter.with_dictionary(&text))
        }
        None => Ok(segmenter),
    }
}

/// Decode the cache file, or `None` if it does not exist.
pub fn read_artifacts(path: &Path) -> Result<Option<RetrievalArtifacts>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };
    let artifacts = RetrievalArtifacts::decode(&bytes)
        .with_context(|| format!("Cannot load artifact cache {}", path.display()))?;
    Ok(Some(artifacts))
}

fn write_artifacts(path: &Path, artifacts: &RetrievalArtifacts) -> Result<()> {
    let bytes = artifacts.encode().context("Failed to encode artifacts")?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, &bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

async fn build_and_persist(config: &Config) -> Result<(RetrievalArtifacts, BuildReport)> {
    let _lock = RebuildLock::acquire(&config.artifacts.lock_path())?;

    let builder = ArtifactBuilder::new(
        build_counter(config)?,
        config.chunking.parent(),
        config.chunking.child(),
    )?
    .with_segmenter(load_segmenter(config)?);

    let pool = db::connect(config).await?;
    let loader = CorpusLoader::new(SqliteDocumentStore::new(pool.clone()));
    let built = builder.build_from_store(&loader).await;
    pool.close().await;
    let (artifacts, report) = built?;

    write_artifacts(&config.artifacts.cache_path, &artifacts)?;
    tracing::info!(path = %config.artifacts.cache_path.display(), "artifact cache written");
    Ok((artifacts, report))
}

/// Rebuild from the document store and overwrite the cache.
pub async fn rebuild_artifacts(config: &Config) -> Result<BuildReport> {
    Ok(build_and_persist(config).await?.1)
}

/// Cached artifacts if present (not checked against the store), otherwise
/// build and persist them.
pub async fn get_artifacts(config: &Config) -> Result<Arc<RetrievalArtifacts>> {
    if let Some(artifacts) = read_artifacts(&config.artifacts.cache_path)? {
        return Ok(Arc::new(artifacts));
    }
    tracing::info!("no artifact cache, building");
    Ok(Arc::new(build_and_persist(config).await?.0))
}

/// `phaply rebuild`
pub async fn run_rebuild(config: &Config) -> Result<()> {
    let report = match rebuild_artifacts(config).await {
        Ok(report) => report,
        Err(e) => {
            if let Some(build_err) = e.downcast_ref::<BuildError>() {
                for failure in build_err.failures() {
                    eprintln!("  {}", failure);
                }
            }
            return Err(e);
        }
    };

    println!("rebuild {}", config.artifacts.cache_path.display());
    println!("  documents: {}", report.documents());
    println!("  parents: {}", report.parents);
    println!("  children: {}", report.children);
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_lock_fails_fast() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("artifacts.bin.lock");
        let first = RebuildLock::acquire(&path).unwrap();
        let err = RebuildLock::acquire(&path).err().unwrap();
        assert!(err.to_string().contains("Another rebuild is running"));
        drop(first);
        assert!(!path.exists());
        assert!(RebuildLock::acquire(&path).is_ok());
    }

    #[test]
    fn test_missing_cache_reads_as_none() {
        let tmp = TempDir::new().unwrap();
        assert!(read_artifacts(&tmp.path().join("none.bin")).unwrap().is_none());
    }

    #[test]
    fn test_garbage_cache_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("artifacts.bin");
        fs::write(&path, b"not an artifact file").unwrap();
        let err = read_artifacts(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Cannot load artifact cache"));
    }
}
