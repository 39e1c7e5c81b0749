//! Write-once persistence of the parameter record.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::ParameterSet;
use crate::error::ParameterError;

/// File name of the parameter record inside a run directory.
pub const PARAMS_FILE: &str = "params.json";

/// On-disk form of the record: the parameters plus when they were written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRecord {
    #[serde(flatten)]
    pub params: ParameterSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Durable home of the [`ParameterSet`] for one run directory.
#[derive(Debug, Clone)]
pub struct ParameterStore {
    path: PathBuf,
}

impl ParameterStore {
    /// Store backed by an explicit file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store backed by `params.json` inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(PARAMS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Validates and writes the record.
    ///
    /// An existing record is never overwritten unless `force` is set, so a
    /// run directory cannot silently change parameters between stages.
    pub fn create(&self, params: &ParameterSet, force: bool) -> Result<(), ParameterError> {
        params.validate()?;

        if self.exists() && !force {
            return Err(ParameterError::AlreadyExists(self.path.clone()));
        }

        let record = PersistedRecord {
            params: params.clone(),
            created_at: Some(Utc::now()),
        };
        let json = serde_json::to_string_pretty(&record)?;

        // Write beside the target and rename so readers never see a torn record.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;

        info!(path = %self.path.display(), "Parameter record written");
        Ok(())
    }

    /// Reads and validates the record.
    pub fn load(&self) -> Result<ParameterSet, ParameterError> {
        Ok(self.load_record()?.params)
    }

    /// Reads the record including its creation timestamp.
    pub fn load_record(&self) -> Result<PersistedRecord, ParameterError> {
        if !self.exists() {
            return Err(ParameterError::NotFound(self.path.clone()));
        }
        let content = fs::read_to_string(&self.path)?;
        let record: PersistedRecord = serde_json::from_str(&content)?;
        record.params.validate()?;
        debug!(path = %self.path.display(), "Parameter record loaded");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_then_load_returns_same_values() {
        let temp = TempDir::new().unwrap();
        let store = ParameterStore::in_dir(temp.path());
        let params = ParameterSet::new("protein.pdb", 56).with_num_frames(200);

        store.create(&params, false).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, params);

        let record = store.load_record().unwrap();
        assert!(record.created_at.is_some());
    }

    #[test]
    fn test_refuses_overwrite_without_force() {
        let temp = TempDir::new().unwrap();
        let store = ParameterStore::in_dir(temp.path());
        let params = ParameterSet::new("protein.pdb", 56);
        store.create(&params, false).unwrap();

        let changed = params.clone().with_temperature(300.0);
        assert!(matches!(
            store.create(&changed, false),
            Err(ParameterError::AlreadyExists(_))
        ));
        assert_eq!(store.load().unwrap().temperature(), 360.0);

        store.create(&changed, true).unwrap();
        assert_eq!(store.load().unwrap().temperature(), 300.0);
    }

    #[test]
    fn test_invalid_record_is_not_written() {
        let temp = TempDir::new().unwrap();
        let store = ParameterStore::in_dir(temp.path());
        let params = ParameterSet::new("protein.pdb", 56).with_num_frames(0);

        assert!(store.create(&params, false).is_err());
        assert!(!store.exists());
    }

    #[test]
    fn test_load_missing_record() {
        let temp = TempDir::new().unwrap();
        let store = ParameterStore::in_dir(temp.path());
        assert!(matches!(store.load(), Err(ParameterError::NotFound(_))));
    }

    #[test]
    fn test_load_rejects_invalid_persisted_values() {
        let temp = TempDir::new().unwrap();
        let store = ParameterStore::in_dir(temp.path());
        fs::write(
            store.path(),
            r#"{"temp": 300.0, "timestep": -1.0, "nanoseconds": 1.0, "numFrames": 10,
                "cudaDevice": "0", "reweighting": false, "numResidues": 5, "pdb": "a.pdb"}"#,
        )
        .unwrap();
        assert!(matches!(
            store.load(),
            Err(ParameterError::InvalidValue { .. })
        ));
    }
}
