// src/charts/mod.rs

//! Chart documents handed to an external renderer. Nothing downstream reads
//! them back.

use serde_json::Value;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::info;

use crate::error::{Result, RxError};

pub mod vegalite;

/// A named, fully-specified chart.
#[derive(Debug, Clone, PartialEq)]
pub struct Chart {
    pub name: String,
    pub spec: Value,
}

impl Chart {
    pub fn new(name: &str, spec: Value) -> Self {
        Self {
            name: name.to_string(),
            spec,
        }
    }

    /// Write `<dir>/<name>.vl.json`, replacing any previous version.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)
            .map_err(|e| RxError::Chart(format!("creating {}: {}", dir.display(), e)))?;
        let path = dir.join(format!("{}.vl.json", self.name));
        let text = serde_json::to_string_pretty(&self.spec)
            .map_err(|e| RxError::Chart(format!("serializing {}: {}", self.name, e)))?;
        fs::write(&path, text)
            .map_err(|e| RxError::Chart(format!("writing {}: {}", path.display(), e)))?;
        info!(chart = %self.name, path = %path.display(), "chart written");
        Ok(path)
    }
}
