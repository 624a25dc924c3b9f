// src/cache/memory.rs

use std::{collections::BTreeMap, sync::Mutex};

use super::CacheStore;
use crate::error::{Result, RxError};

/// Volatile store, used where touching disk is unwanted (tests, dry runs).
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> RxError {
    RxError::Cache("memory store lock poisoned".to_string())
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let map = self.entries.lock().map_err(|_| poisoned())?;
        Ok(map.get(key).cloned())
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let mut map = self.entries.lock().map_err(|_| poisoned())?;
        map.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let map = self.entries.lock().map_err(|_| poisoned())?;
        Ok(map.keys().cloned().collect())
    }
}
