// src/config.rs

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info};
use url::Url;

use crate::error::{Result, RxError};
use crate::pipeline::MonthWindow;

/// Env var naming an alternative config file.
pub const CONFIG_ENV: &str = "ORAMORPH_CONFIG";
/// Env var carrying the BigQuery OAuth bearer token; wins over the file.
pub const TOKEN_ENV: &str = "BIGQUERY_ACCESS_TOKEN";
const DEFAULT_CONFIG_FILE: &str = "oramorph.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bigquery: BigQueryConfig,
    /// Root of the on-disk query result cache.
    pub cache_dir: PathBuf,
    /// Where chart documents are written.
    pub output_dir: PathBuf,
    pub analysis: AnalysisConfig,
    /// TopoJSON with one feature per region, keyed by `properties.code`.
    pub boundaries_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BigQueryConfig {
    pub endpoint: Url,
    pub project: String,
    pub access_token: Option<String>,
    pub max_results: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// SQL `LIKE` pattern for the BNF codes of interest.
    pub bnf_pattern: String,
    /// Region drawn over the decile chart.
    pub subject_region: String,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    /// Dose-per-item (ml) at or above which a prescription counts as excessive.
    pub excess_threshold: f64,
    pub top_quantities: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bigquery: BigQueryConfig::default(),
            cache_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("charts"),
            analysis: AnalysisConfig::default(),
            boundaries_url: "https://raw.githubusercontent.com/ebmdatalab/openprescribing/master/openprescribing/media/geojson/ccg_boundaries.topojson".to_string(),
        }
    }
}

impl Default for BigQueryConfig {
    fn default() -> Self {
        Self {
            endpoint: Url::parse("https://bigquery.googleapis.com/bigquery/v2/")
                .expect("static BigQuery endpoint should parse"),
            project: "ebmdatalab".to_string(),
            access_token: None,
            max_results: 50_000,
            timeout_secs: 600,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            bnf_pattern: "0407020Q0%CN".to_string(),
            subject_region: "15N".to_string(),
            window_start: NaiveDate::from_ymd_opt(2019, 1, 1).expect("valid date"),
            window_end: NaiveDate::from_ymd_opt(2019, 12, 1).expect("valid date"),
            excess_threshold: 6000.0,
            top_quantities: 6,
        }
    }
}

impl AnalysisConfig {
    pub fn window(&self) -> Result<MonthWindow> {
        MonthWindow::new(self.window_start, self.window_end)
    }
}

impl Config {
    /// Parse a YAML document; absent fields fall back to defaults.
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| RxError::Config(e.to_string()))
    }

    /// Load from `ORAMORPH_CONFIG`, else `./oramorph.yaml` when present,
    /// else defaults. The token env var overrides whatever the file says.
    pub fn load() -> Result<Self> {
        let mut cfg = match env::var(CONFIG_ENV) {
            Ok(path) => Self::from_path(Path::new(&path))?,
            Err(_) if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_path(Path::new(DEFAULT_CONFIG_FILE))?
            }
            Err(_) => {
                debug!("no config file; using defaults");
                Self::default()
            }
        };
        if let Ok(token) = env::var(TOKEN_ENV) {
            cfg.bigquery.access_token = Some(token);
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| RxError::Config(format!("reading {}: {}", path.display(), e)))?;
        info!(path = %path.display(), "loaded config");
        Self::from_yaml(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.analysis.window().map_err(|e| match e {
            RxError::Data(msg) => RxError::Config(format!("analysis window: {}", msg)),
            other => other,
        })?;
        if self.analysis.bnf_pattern.contains('\'') {
            return Err(RxError::Config(
                "bnf_pattern must not contain a quote".to_string(),
            ));
        }
        if self.bigquery.project.is_empty() {
            return Err(RxError::Config("bigquery.project is empty".to_string()));
        }
        Ok(())
    }
}
