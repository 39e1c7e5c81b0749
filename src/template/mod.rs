//! Control text generation for the engine and its auxiliary tools.
//!
//! Stage decks are built as typed [`ControlDeck`] values from a
//! [`ParameterSet`] and a [`StageKind`], and only turned into text by
//! [`ControlDeck::render`]. Derived integers come from [`StepPlan`] and
//! [`TemperatureRamp`].
//!
//! # Example
//!
//! ```rust,ignore
//! use md_forge::params::ParameterSet;
//! use md_forge::pipeline::StageKind;
//! use md_forge::template::render_stage;
//!
//! let params = ParameterSet::new("protein.pdb", 56);
//! let text = render_stage(&params, StageKind::Production)?;
//! assert!(text.contains("nstlim=4000000,"));
//! ```

pub mod deck;
pub mod plan;
pub mod scripts;

pub use deck::{ControlDeck, NamelistValue, WeightRecord};
pub use plan::{format_decimal, StepPlan, TemperatureRamp};

use crate::error::TemplateError;
use crate::params::ParameterSet;
use crate::pipeline::StageKind;

/// Minimisation cycles (steepest descent for the first `MIN_SD_CYCLES`).
const MIN_MAX_CYCLES: u64 = 2000;
const MIN_SD_CYCLES: u64 = 1000;
/// Steps of the heating and pre-production stages.
const HEAT_STEPS: u64 = 10_000;
const PREPROD_STEPS: u64 = 10_000;
/// Decimals for `dt` (ps) and temperatures (K).
const DT_PLACES: usize = 9;
const TEMP_PLACES: usize = 6;

/// Fails if `text` still carries template syntax.
pub fn ensure_resolved(text: &str) -> Result<(), TemplateError> {
    for marker in ["{{", "}}", "{%", "%}", "{#", "#}"] {
        if let Some(pos) = text.find(marker) {
            let end = (pos + 24).min(text.len());
            let snippet = text.get(pos..end).unwrap_or(marker);
            return Err(TemplateError::Unresolved(snippet.to_string()));
        }
    }
    Ok(())
}

/// Builds the typed deck for one stage.
pub fn stage_deck(params: &ParameterSet, stage: StageKind) -> Result<ControlDeck, TemplateError> {
    params.validate()?;
    let dt = params.timestep_fs() / 1000.0;
    let temp = params.temperature();
    // nstlim is derived from this exact step, so dt must print without rounding.
    let printed: f64 = format_decimal(dt, DT_PLACES).parse().unwrap_or(0.0);
    if (printed - dt).abs() > dt * 1e-9 {
        return Err(TemplateError::Unrepresentable { field: "dt", value: dt });
    }

    let deck = match stage {
        StageKind::Minimize => ControlDeck::new("Minimize")
            .int("imin", 1)
            .int("ntx", 1)
            .int("irest", 0)
            .steps("maxcyc", MIN_MAX_CYCLES)
            .steps("ncyc", MIN_SD_CYCLES)
            .steps("ntpr", 100)
            .int("ntwx", 0)
            .real("cut", 8.0, 1),
        StageKind::Heat => {
            let ramp = TemperatureRamp::heating(HEAT_STEPS, temp);
            ControlDeck::new("Heat")
                .int("imin", 0)
                .int("ntx", 1)
                .int("irest", 0)
                .steps("nstlim", HEAT_STEPS)
                .real("dt", dt, DT_PLACES)
                .int("ntf", 2)
                .int("ntc", 2)
                .real("tempi", 0.0, 1)
                .real("temp0", temp, TEMP_PLACES)
                .steps("ntpr", 100)
                .steps("ntwx", 100)
                .real("cut", 8.0, 1)
                .int("ntb", 1)
                .int("ntp", 0)
                .int("ntt", 3)
                .real("gamma_ln", 2.0, 1)
                .int("nmropt", 1)
                .int("ig", -1)
                .weights(WeightRecord::for_ramp(&ramp))
        }
        StageKind::PreProduction => npt_deck(PREPROD_STEPS, 200, 500, 200, dt, temp),
        StageKind::Production => {
            let plan = StepPlan::production(params)?;
            npt_deck(plan.total_steps, 1000, plan.write_frequency, 10_000, dt, temp)
        }
    };
    Ok(deck)
}

/// Constant-pressure deck shared by pre-production and production.
fn npt_deck(nstlim: u64, ntpr: u64, ntwx: u64, ntwr: u64, dt: f64, temp: f64) -> ControlDeck {
    ControlDeck::new("Typical Production MD NPT, MC Bar 4fs HMR")
        .int("ntx", 5)
        .int("irest", 1)
        .int("ntc", 2)
        .int("ntf", 2)
        .steps("nstlim", nstlim)
        .steps("ntpr", ntpr)
        .steps("ntwx", ntwx)
        .steps("ntwr", ntwr)
        .real("dt", dt, DT_PLACES)
        .real("cut", 9.5, 1)
        .int("ntt", 1)
        .real("tautp", 10.0, 1)
        .real("temp0", temp, TEMP_PLACES)
        .int("ntb", 2)
        .int("ntp", 1)
        .int("barostat", 2)
        .int("ioutfm", 1)
}

/// Renders the control text for one stage.
pub fn render_stage(params: &ParameterSet, stage: StageKind) -> Result<String, TemplateError> {
    stage_deck(params, stage)?.render()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ParameterSet {
        ParameterSet::new("protein.pdb", 56)
            .with_timestep(2.5)
            .with_nanoseconds(10.0)
            .with_num_frames(400)
            .with_temperature(360.0)
    }

    #[test]
    fn test_production_deck_scenario() {
        let text = render_stage(&params(), StageKind::Production).unwrap();
        assert!(text.contains("  nstlim=4000000,\n"));
        assert!(text.contains("  ntwx=10000,\n"));
        assert!(text.contains("  dt=0.0025,\n"));
        assert!(text.contains("  temp0=360.0,\n"));
    }

    #[test]
    fn test_heat_deck_ramp_records() {
        let text = render_stage(&params(), StageKind::Heat).unwrap();
        assert!(text.starts_with("Heat\n &cntrl\n"));
        assert!(text.contains("  nmropt=1,\n"));
        assert!(text.contains("istep1=0, istep2=9000, value1=0.0, value2=360.0"));
        assert!(text.contains("istep1=9001, istep2=10000, value1=360.0, value2=360.0"));
    }

    #[test]
    fn test_minimize_deck() {
        let text = render_stage(&params(), StageKind::Minimize).unwrap();
        assert!(text.contains("  maxcyc=2000,\n"));
        assert!(text.contains("  ncyc=1000,\n"));
        assert!(!text.contains("&wt"));
    }

    #[test]
    fn test_all_stages_fully_resolved_with_positive_fields() {
        let variants = [
            params(),
            params().with_timestep(4.0).with_reweighting(true),
            params().with_nanoseconds(0.1).with_num_frames(7),
            params().with_nanoseconds(250.0).with_num_frames(5000),
        ];
        for p in &variants {
            for stage in StageKind::ALL {
                let deck = stage_deck(p, stage).unwrap();
                let text = deck.render().unwrap();
                assert!(ensure_resolved(&text).is_ok());
                for key in ["nstlim", "ntwx", "ntpr", "maxcyc", "ncyc", "ntwr"] {
                    if let Some(value) = deck.get_int(key) {
                        if stage != StageKind::Minimize || key != "ntwx" {
                            assert!(value > 0, "{} of {} must be positive", key, stage);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_production_write_frequency_respects_budget() {
        let p = params().with_nanoseconds(3.3).with_num_frames(333);
        let deck = stage_deck(&p, StageKind::Production).unwrap();
        let nstlim = deck.get_int("nstlim").unwrap();
        let ntwx = deck.get_int("ntwx").unwrap();
        assert!(ntwx * 333 <= nstlim);
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        let p = params().with_num_frames(0);
        assert!(matches!(
            render_stage(&p, StageKind::Production),
            Err(TemplateError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_rendered_dt_matches_timestep() {
        for fs in [0.04, 0.25, 1.0, 1.25, 2.0, 2.5, 4.0] {
            let p = params().with_timestep(fs).with_nanoseconds(1.0);
            let deck = stage_deck(&p, StageKind::Production).unwrap();
            let text = deck.render().unwrap();
            let dt: f64 = text
                .lines()
                .find_map(|line| line.trim().strip_prefix("dt="))
                .and_then(|v| v.trim_end_matches(',').parse().ok())
                .unwrap();
            assert!((dt - fs / 1000.0).abs() < 1e-15, "{} fs printed as {}", fs, dt);

            let nstlim = deck.get_int("nstlim").unwrap() as f64;
            assert!((nstlim * dt - 1000.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_rejects_timestep_that_cannot_be_printed() {
        let p = params().with_timestep(1e-7).with_nanoseconds(1e-6);
        assert!(matches!(
            stage_deck(&p, StageKind::Heat),
            Err(TemplateError::Unrepresentable { field: "dt", .. })
        ));
    }

    #[test]
    fn test_temperature_keeps_decimals() {
        let p = params().with_temperature(310.15);
        let text = render_stage(&p, StageKind::Production).unwrap();
        assert!(text.contains("  temp0=310.15,\n"));
    }

    #[test]
    fn test_ensure_resolved_detects_placeholders() {
        assert!(ensure_resolved("nstlim={{ steps }}").is_err());
        assert!(ensure_resolved("{% if x %}").is_err());
        assert!(ensure_resolved("for {set i 0} {$i < $nf} {incr i} {").is_ok());
    }
}
