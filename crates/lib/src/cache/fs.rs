use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info};

use super::{Cache, CacheEntry, CacheError};

const TEMP_PREFIX: &str = ".tmp-";

/// One file per key under a root directory.
#[derive(Debug, Clone)]
pub struct FsCache {
  root: PathBuf,
}

impl FsCache {
  /// Opens the cache at `root`, creating the directory if needed.
  pub fn new(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
    let root = root.into();
    std::fs::create_dir_all(&root)?;
    Ok(Self { root })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn path_for(&self, key: &str) -> Result<PathBuf, CacheError> {
    if key.is_empty() || key == "." || key == ".." || key.contains(['/', '\\']) || key.starts_with(TEMP_PREFIX) {
      return Err(CacheError::InvalidKey { key: key.to_string() });
    }
    Ok(self.root.join(key))
  }

  /// Every entry with its size and modification time, sorted by key.
  pub async fn entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
    let mut entries = Vec::new();
    for key in self.keys().await? {
      let meta = tokio::fs::metadata(self.path_for(&key)?).await?;
      entries.push(CacheEntry {
        key,
        size: meta.len(),
        modified: meta.modified()?,
      });
    }
    Ok(entries)
  }

  /// Deletes entries and returns how many were removed.
  ///
  /// With `older_than`, only entries last written longer ago than that are
  /// removed.
  pub async fn clear(&self, older_than: Option<Duration>) -> Result<usize, CacheError> {
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in self.entries().await? {
      if let Some(age) = older_than
        && now.duration_since(entry.modified).unwrap_or_default() < age
      {
        continue;
      }
      self.delete(&entry.key).await?;
      removed += 1;
    }
    info!(root = %self.root.display(), removed, "cleared cache");
    Ok(removed)
  }
}

fn not_found(err: std::io::Error, key: &str) -> CacheError {
  if err.kind() == ErrorKind::NotFound {
    CacheError::NoSuchKey { key: key.to_string() }
  } else {
    CacheError::Io(err)
  }
}

impl Cache for FsCache {
  async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
    let path = self.path_for(key)?;
    tokio::fs::read(&path).await.map_err(|e| not_found(e, key))
  }

  /// Writes to a temporary sibling then renames it over the entry, so readers
  /// never see a partial file. Entries are readable by the owner only.
  async fn set(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
    let path = self.path_for(key)?;
    let root = self.root.clone();
    let bytes = bytes.to_vec();

    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
      // NamedTempFile is created with 0600 on Unix.
      let mut tmp = tempfile::Builder::new().prefix(TEMP_PREFIX).tempfile_in(&root)?;
      tmp.write_all(&bytes)?;
      tmp.as_file().sync_all()?;
      tmp.persist(&path).map_err(|e| e.error)?;
      Ok(())
    })
    .await
    .map_err(std::io::Error::other)??;

    debug!(key = %key, "stored cache entry");
    Ok(())
  }

  async fn keys(&self) -> Result<Vec<String>, CacheError> {
    let mut keys = Vec::new();
    let mut entries = tokio::fs::read_dir(&self.root).await?;
    while let Some(entry) = entries.next_entry().await? {
      if entry.file_type().await?.is_dir() {
        continue;
      }
      let name = entry.file_name().to_string_lossy().into_owned();
      if name.starts_with(TEMP_PREFIX) {
        continue;
      }
      keys.push(name);
    }
    keys.sort();
    Ok(keys)
  }

  async fn delete(&self, key: &str) -> Result<(), CacheError> {
    let path = self.path_for(key)?;
    tokio::fs::remove_file(&path).await.map_err(|e| not_found(e, key))
  }
}
