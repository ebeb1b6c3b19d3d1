// src/config.rs
//! Pipeline configuration: where things live and how they are parsed.
//! Every field has a default so an empty (or absent) YAML file is valid.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::{IoContext, PipelineError, Result};
use crate::storage::{CsvOptions, ParquetCompression, StorageLocation};

/// Overrides `storage_root` when set.
pub const ROOT_ENV: &str = "DISTRICT_ETL_ROOT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    pub demographics: String,
    pub crime: String,
    pub crime_incidence: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            demographics: "tables/demographics".into(),
            crime: "tables/crime".into(),
            crime_incidence: "tables/crime_incidence".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LandingPaths {
    pub demographics: String,
    pub crime: String,
}

impl Default for LandingPaths {
    fn default() -> Self {
        Self {
            demographics: "landing/demographics".into(),
            crime: "landing/crime".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub storage_root: PathBuf,
    pub landing: LandingPaths,
    pub tables: TableNames,
    pub csv: CsvOptions,
    /// Rows per shard for the parallel forward-fill; `0` = sequential.
    pub fill_shard_len: usize,
    pub compression: ParquetCompression,
    /// Relative to `storage_root`.
    pub run_log_dir: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("data"),
            landing: LandingPaths::default(),
            tables: TableNames::default(),
            csv: CsvOptions::default(),
            fill_shard_len: 65_536,
            compression: ParquetCompression::default(),
            run_log_dir: "runs".into(),
        }
    }
}

impl PipelineConfig {
    /// Load from `path` if given, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => Self::from_yaml(&fs::read_to_string(p).at(p)?)?,
            None => Self::default(),
        };
        if let Ok(root) = env::var(ROOT_ENV) {
            if !root.trim().is_empty() {
                cfg.storage_root = PathBuf::from(root);
            }
        }
        Ok(cfg)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
            .map_err(|e| PipelineError::InvalidParameter(format!("config: {}", e)))
    }

    pub fn location(&self) -> StorageLocation {
        StorageLocation::new(&self.storage_root)
    }

    pub fn run_log_path(&self) -> PathBuf {
        self.storage_root.join(&self.run_log_dir)
    }
}
