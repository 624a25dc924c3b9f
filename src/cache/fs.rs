// src/cache/fs.rs

use glob::glob;
use std::{
    fs,
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};
use tracing::{debug, warn};

use super::CacheStore;
use crate::error::{Result, RxError};

/// One file per key under `root`. Writes land on `<key>.tmp` first and are
/// renamed into place, so a crashed run never leaves a half-written entry.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            RxError::Cache(format!("creating cache dir {}: {}", root.display(), e))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Keys are relative paths; anything that would escape `root` is refused.
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        let ok = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !ok {
            return Err(RxError::Cache(format!("invalid cache key {:?}", key)));
        }
        Ok(self.root.join(rel))
    }
}

impl CacheStore for FsStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RxError::Cache(format!("reading {}: {}", path.display(), e))),
        }
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                RxError::Cache(format!("creating {}: {}", parent.display(), e))
            })?;
        }
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, data)
            .map_err(|e| RxError::Cache(format!("writing {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &path).map_err(|e| {
            RxError::Cache(format!(
                "renaming {} → {}: {}",
                tmp.display(),
                path.display(),
                e
            ))
        })?;
        debug!(path = %path.display(), bytes = data.len(), "cache entry written");
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let pattern = format!("{}/**/*", self.root.display());
        let mut keys = Vec::new();
        for entry in glob(&pattern).map_err(|e| RxError::Cache(e.to_string()))? {
            let path = match entry {
                Ok(p) => p,
                Err(e) => {
                    warn!("cannot read cache entry: {:?}", e);
                    continue;
                }
            };
            if !path.is_file() || path.extension().is_some_and(|ext| ext == "tmp") {
                continue;
            }
            if let Ok(rel) = path.strip_prefix(&self.root) {
                keys.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        keys.sort();
        Ok(keys)
    }
}
