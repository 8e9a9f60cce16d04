//! Persistable position record and its JSON file format.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::types::{fix_quality_description, Result};

/// Aggregate statistics over the samples behind an averaged position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionStats {
    pub sample_count: usize,
    #[serde(rename = "duration_seconds")]
    pub duration: f64,
    pub latitude_std_dev: f64,
    pub longitude_std_dev: f64,
    pub altitude_std_dev: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Every observed solution by fix quality, accepted or not
    pub fix_quality_distribution: BTreeMap<u8, u64>,
}

/// A position as written to and read from disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub fix_quality: u8,
    pub satellites: u32,
    pub hdop: f64,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<PositionStats>,
}

impl Position {
    pub fn fix_quality_description(&self) -> String {
        fix_quality_description(self.fix_quality)
    }

    /// Write pretty-printed JSON, creating parent directories.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        info!("position written to {}", path.display());
        Ok(())
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
