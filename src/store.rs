/// Durable storage for consumption state.
///
/// The document is small and rewritten whole after every successful cycle:
///
/// ```json
/// {
///   "version": 1,
///   "consumption_totals": { "123-main-st": 727.8 },
///   "previous_readings": { "123-main-st": 280.0 },
///   "last_updated": "2024-03-15T12:00:00Z"
/// }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const STORAGE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
    pub version: u32,
    /// Cumulative energy per tank id.
    #[serde(default)]
    pub consumption_totals: BTreeMap<String, f64>,
    /// Last validated volume per tank id.
    #[serde(default)]
    pub previous_readings: BTreeMap<String, f64>,
    pub last_updated: DateTime<Utc>,
}

impl StoreDocument {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            version: STORAGE_VERSION,
            consumption_totals: BTreeMap::new(),
            previous_readings: BTreeMap::new(),
            last_updated: now,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("State file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("State file is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("State file version {found} is newer than this build supports")]
    UnsupportedVersion { found: u32 },
}

/// Key-value persistence for the consumption ledger.
pub trait StateStore: Send {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<StoreDocument>, StoreError>;
    fn save(&self, doc: &StoreDocument) -> Result<(), StoreError>;
}

/// One JSON file, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<Option<StoreDocument>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)?;
        let doc: StoreDocument = serde_json::from_str(&text)?;
        if doc.version > STORAGE_VERSION {
            return Err(StoreError::UnsupportedVersion { found: doc.version });
        }
        Ok(Some(doc))
    }

    fn save(&self, doc: &StoreDocument) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.temp_path();
        fs::write(&tmp, serde_json::to_string_pretty(doc)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
    }

    fn sample() -> StoreDocument {
        let mut doc = StoreDocument::empty(fixed_now());
        doc.consumption_totals.insert("123-main-st".into(), 727.8);
        doc.previous_readings.insert("123-main-st".into(), 280.0);
        doc
    }

    #[test]
    fn test_missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("state.json"));

        store.save(&sample()).expect("save should create parent dirs");
        assert_eq!(store.load().unwrap(), Some(sample()));
        assert!(!store.temp_path().exists(), "temp file is renamed away");
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();

        let err = JsonFileStore::new(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::Serde(_)));
    }

    #[test]
    fn test_newer_version_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut doc = sample();
        doc.version = STORAGE_VERSION + 1;
        fs::write(&path, serde_json::to_string(&doc).unwrap()).unwrap();

        let err = JsonFileStore::new(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedVersion { found } if found == STORAGE_VERSION + 1));
    }

    #[test]
    fn test_document_field_names() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["consumption_totals"]["123-main-st"], 727.8);
        assert_eq!(json["previous_readings"]["123-main-st"], 280.0);
        assert_eq!(json["last_updated"], "2024-03-15T12:00:00Z");
    }
}
