//! Simulation parameter record.
//!
//! A [`ParameterSet`] is created once at setup, persisted through the
//! [`ParameterStore`], and read back by every later invocation. Fields are
//! private: a change in parameters means building a new record with the
//! `with_*` methods and persisting it again.
//!
//! # Example
//!
//! ```rust,ignore
//! use md_forge::params::{ParameterSet, ParameterStore};
//!
//! let params = ParameterSet::new("protein.pdb", 56)
//!     .with_nanoseconds(10.0)
//!     .with_num_frames(400)
//!     .with_temperature(360.0);
//! params.validate()?;
//!
//! ParameterStore::in_dir("./run").create(&params, false)?;
//! ```

pub mod store;

pub use store::{ParameterStore, PersistedRecord, PARAMS_FILE};

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ParameterError;

const DEFAULT_TEMPERATURE_K: f64 = 360.0;
const DEFAULT_TIMESTEP_FS: f64 = 2.5;
const DEFAULT_NANOSECONDS: f64 = 10.0;
const DEFAULT_NUM_FRAMES: u32 = 400;
const DEFAULT_BOX_PADDING: f64 = 15.0;

fn default_box_size() -> f64 {
    DEFAULT_BOX_PADDING
}

/// Immutable description of one simulation campaign.
///
/// Serialized with the key names the engine driver has always used
/// (`temp`, `numFrames`, `cudaDevice`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSet {
    /// Target temperature in Kelvin.
    temp: f64,
    /// Integration time step in femtoseconds.
    timestep: f64,
    /// Production length in nanoseconds.
    nanoseconds: f64,
    /// Number of frames the production trajectory should contain.
    num_frames: u32,
    /// Compute device identifier exported to the engine process.
    cuda_device: String,
    /// Whether hydrogen mass repartitioning runs before the first stage.
    reweighting: bool,
    /// Number of solute residues; anchors reimaging.
    num_residues: u32,
    /// Input structure file.
    pdb: PathBuf,
    /// Strip the terminal OXT charge from the topology.
    #[serde(default)]
    remove_oxt: bool,
    /// Solvent box padding in angstroms.
    #[serde(default = "default_box_size")]
    box_size: f64,
}

impl ParameterSet {
    /// Creates a record with the driver's defaults for everything but the
    /// structure and residue count.
    pub fn new(pdb: impl Into<PathBuf>, num_residues: u32) -> Self {
        Self {
            temp: DEFAULT_TEMPERATURE_K,
            timestep: DEFAULT_TIMESTEP_FS,
            nanoseconds: DEFAULT_NANOSECONDS,
            num_frames: DEFAULT_NUM_FRAMES,
            cuda_device: "0".to_string(),
            reweighting: false,
            num_residues,
            pdb: pdb.into(),
            remove_oxt: false,
            box_size: DEFAULT_BOX_PADDING,
        }
    }

    /// Sets the target temperature (K).
    pub fn with_temperature(mut self, kelvin: f64) -> Self {
        self.temp = kelvin;
        self
    }

    /// Sets the integration time step (fs).
    pub fn with_timestep(mut self, femtoseconds: f64) -> Self {
        self.timestep = femtoseconds;
        self
    }

    /// Sets the production length (ns).
    pub fn with_nanoseconds(mut self, nanoseconds: f64) -> Self {
        self.nanoseconds = nanoseconds;
        self
    }

    /// Sets the desired production frame count.
    pub fn with_num_frames(mut self, frames: u32) -> Self {
        self.num_frames = frames;
        self
    }

    /// Sets the compute device identifier.
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.cuda_device = device.into();
        self
    }

    /// Enables or disables hydrogen mass repartitioning.
    pub fn with_reweighting(mut self, reweighting: bool) -> Self {
        self.reweighting = reweighting;
        self
    }

    /// Sets the OXT removal flag.
    pub fn with_remove_oxt(mut self, remove: bool) -> Self {
        self.remove_oxt = remove;
        self
    }

    /// Sets the solvent box padding (Å).
    pub fn with_box_size(mut self, angstroms: f64) -> Self {
        self.box_size = angstroms;
        self
    }

    pub fn temperature(&self) -> f64 {
        self.temp
    }

    pub fn timestep_fs(&self) -> f64 {
        self.timestep
    }

    pub fn nanoseconds(&self) -> f64 {
        self.nanoseconds
    }

    pub fn num_frames(&self) -> u32 {
        self.num_frames
    }

    pub fn device(&self) -> &str {
        &self.cuda_device
    }

    pub fn reweighting(&self) -> bool {
        self.reweighting
    }

    pub fn num_residues(&self) -> u32 {
        self.num_residues
    }

    pub fn pdb(&self) -> &Path {
        &self.pdb
    }

    pub fn remove_oxt(&self) -> bool {
        self.remove_oxt
    }

    pub fn box_size(&self) -> f64 {
        self.box_size
    }

    /// Checks every field against the ranges the stage decks rely on.
    ///
    /// # Errors
    ///
    /// Returns `ParameterError::InvalidValue` for out-of-range values and
    /// `ParameterError::Unsupported` when OXT removal is requested.
    pub fn validate(&self) -> Result<(), ParameterError> {
        require_positive("temp", self.temp)?;
        require_positive("timestep", self.timestep)?;
        require_positive("nanoseconds", self.nanoseconds)?;
        require_positive("boxSize", self.box_size)?;

        if self.num_frames == 0 {
            return Err(invalid("numFrames", "must be at least 1"));
        }
        if self.num_residues == 0 {
            return Err(invalid("numResidues", "must be at least 1"));
        }
        if self.cuda_device.is_empty()
            || !self
                .cuda_device
                .chars()
                .all(|c| c.is_ascii_digit() || c == ',')
        {
            return Err(invalid(
                "cudaDevice",
                &format!(
                    "'{}' is not a device index list (e.g. '0' or '0,1')",
                    self.cuda_device
                ),
            ));
        }
        if self.pdb.as_os_str().is_empty() {
            return Err(invalid("pdb", "structure path is empty"));
        }
        if self.remove_oxt {
            return Err(ParameterError::Unsupported(
                "removeOxt: terminal OXT charge removal is not provided".to_string(),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ParameterError {
    ParameterError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn require_positive(field: &str, value: f64) -> Result<(), ParameterError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(field, &format!("must be a positive number, got {}", value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let params = ParameterSet::new("protein.pdb", 56);
        assert!(params.validate().is_ok());
        assert_eq!(params.timestep_fs(), 2.5);
        assert_eq!(params.num_frames(), 400);
        assert_eq!(params.device(), "0");
        assert!(!params.reweighting());
    }

    #[test]
    fn test_builder_produces_new_record() {
        let base = ParameterSet::new("protein.pdb", 56);
        let changed = base.clone().with_temperature(300.0).with_reweighting(true);
        assert_eq!(base.temperature(), 360.0);
        assert_eq!(changed.temperature(), 300.0);
        assert!(changed.reweighting());
        assert_ne!(base, changed);
    }

    #[test]
    fn test_rejects_non_positive_timestep_and_frames() {
        let params = ParameterSet::new("protein.pdb", 56).with_timestep(0.0);
        assert!(matches!(
            params.validate(),
            Err(ParameterError::InvalidValue { ref field, .. }) if field == "timestep"
        ));

        let params = ParameterSet::new("protein.pdb", 56).with_num_frames(0);
        assert!(matches!(
            params.validate(),
            Err(ParameterError::InvalidValue { ref field, .. }) if field == "numFrames"
        ));

        let params = ParameterSet::new("protein.pdb", 56).with_nanoseconds(f64::NAN);
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_device() {
        let params = ParameterSet::new("protein.pdb", 56).with_device("gpu0");
        assert!(params.validate().is_err());

        let params = ParameterSet::new("protein.pdb", 56).with_device("0,1");
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_remove_oxt_is_unsupported() {
        let params = ParameterSet::new("protein.pdb", 56).with_remove_oxt(true);
        assert!(matches!(
            params.validate(),
            Err(ParameterError::Unsupported(_))
        ));
    }

    #[test]
    fn test_serializes_with_driver_keys() {
        let params = ParameterSet::new("protein.pdb", 56).with_device("1");
        let json = serde_json::to_value(&params).expect("serialization should work");
        assert_eq!(json["temp"], 360.0);
        assert_eq!(json["numFrames"], 400);
        assert_eq!(json["cudaDevice"], "1");
        assert_eq!(json["numResidues"], 56);
        assert_eq!(json["removeOxt"], false);
        assert_eq!(json["boxSize"], 15.0);
    }

    #[test]
    fn test_optional_keys_default_on_load() {
        let json = r#"{
            "temp": 300.0,
            "timestep": 4.0,
            "nanoseconds": 2.0,
            "numFrames": 100,
            "cudaDevice": "0",
            "reweighting": true,
            "numResidues": 20,
            "pdb": "linear.pdb"
        }"#;
        let params: ParameterSet = serde_json::from_str(json).expect("should deserialize");
        assert_eq!(params.box_size(), 15.0);
        assert!(!params.remove_oxt());
        assert!(params.validate().is_ok());
    }
}
