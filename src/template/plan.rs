//! Derived numeric fields of the stage decks.
//!
//! Everything the engine needs as an integer (step counts, write frequencies,
//! ramp boundaries) is computed here from the [`ParameterSet`] so the deck
//! model only ever carries resolved values.

use serde::Serialize;

use crate::error::TemplateError;
use crate::params::ParameterSet;

/// Femtoseconds per nanosecond.
const FS_PER_NS: f64 = 1_000_000.0;

/// Fraction of the heating stage spent ramping before the hold phase.
pub const RAMP_FRACTION_NUM: u64 = 9;
pub const RAMP_FRACTION_DEN: u64 = 10;

/// Step count and trajectory write frequency of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepPlan {
    /// Total integration steps (`nstlim`).
    pub total_steps: u64,
    /// Steps between trajectory frames (`ntwx`).
    pub write_frequency: u64,
}

impl StepPlan {
    /// Production plan derived from the record's length, time step and frame budget.
    pub fn production(params: &ParameterSet) -> Result<Self, TemplateError> {
        params.validate()?;
        Self::from_length(params.nanoseconds(), params.timestep_fs(), params.num_frames())
    }

    /// Plan for `nanoseconds` of dynamics at `timestep_fs`, writing at most
    /// `frames` frames.
    ///
    /// The step count is rounded to the nearest integer; the write frequency
    /// is floored so `write_frequency * frames <= total_steps`.
    pub fn from_length(
        nanoseconds: f64,
        timestep_fs: f64,
        frames: u32,
    ) -> Result<Self, TemplateError> {
        if !(timestep_fs.is_finite() && timestep_fs > 0.0) {
            return Err(TemplateError::NonPositive {
                field: "timestep",
                value: timestep_fs as i64,
            });
        }
        if frames == 0 {
            return Err(TemplateError::NonPositive {
                field: "numFrames",
                value: 0,
            });
        }

        let steps = (nanoseconds * FS_PER_NS / timestep_fs).round();
        if !(steps.is_finite() && steps >= 1.0) {
            return Err(TemplateError::NonPositive {
                field: "nstlim",
                value: steps as i64,
            });
        }
        let total_steps = steps as u64;

        let write_frequency = total_steps / u64::from(frames);
        if write_frequency == 0 {
            return Err(TemplateError::NonPositive {
                field: "ntwx",
                value: 0,
            });
        }

        Ok(Self {
            total_steps,
            write_frequency,
        })
    }

    /// Number of frames the engine will write under this plan.
    pub fn frames_written(&self) -> u64 {
        self.total_steps / self.write_frequency
    }
}

/// Linear heat-up from 0 K followed by a constant hold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TemperatureRamp {
    /// Steps in the heating stage.
    pub total_steps: u64,
    /// Last step of the ramp phase; the target is reached exactly here.
    pub ramp_end: u64,
    /// Target temperature in Kelvin.
    pub target: f64,
}

impl TemperatureRamp {
    /// Ramp over the first 90% of `total_steps`, hold for the rest.
    pub fn heating(total_steps: u64, target: f64) -> Self {
        Self {
            total_steps,
            ramp_end: total_steps * RAMP_FRACTION_NUM / RAMP_FRACTION_DEN,
            target,
        }
    }

    /// First step of the hold phase.
    pub fn hold_start(&self) -> u64 {
        self.ramp_end + 1
    }

    /// Scheduled temperature at `step`.
    pub fn temperature_at(&self, step: u64) -> f64 {
        if self.ramp_end == 0 || step >= self.ramp_end {
            return self.target;
        }
        self.target * step as f64 / self.ramp_end as f64
    }
}

/// Formats a decimal without float noise or trailing zeros (`0.0025`, `0.004`).
pub fn format_decimal(value: f64, max_places: usize) -> String {
    let text = format!("{:.*}", max_places, value);
    if !text.contains('.') {
        return text;
    }
    let trimmed = text.trim_end_matches('0');
    if trimmed.ends_with('.') {
        format!("{}0", trimmed)
    } else {
        trimmed.to_string()
    }
}
