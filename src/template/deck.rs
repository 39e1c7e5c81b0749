//! Structured model of an engine control deck.
//!
//! A deck is a title line, one `&cntrl` namelist of typed entries, and an
//! optional list of `&wt` weight-change records. Values are typed until
//! [`ControlDeck::render`], which lays them out with tera.

use serde::Serialize;
use tera::{Context, Tera};

use super::plan::{format_decimal, TemperatureRamp};
use crate::error::TemplateError;

const DECK_TEMPLATE: &str = r#"{{ title }}
 &cntrl
{% for entry in cntrl %}  {{ entry.key }}={{ entry.value }},
{% endfor %} /
{% for wt in weights %}&wt type='{{ wt.kind }}'{% if wt.range %}, istep1={{ wt.range.istep1 }}, istep2={{ wt.range.istep2 }}, value1={{ wt.range.value1 }}, value2={{ wt.range.value2 }}{% endif %} /
{% endfor %}"#;

/// A typed namelist value.
#[derive(Debug, Clone, PartialEq)]
pub enum NamelistValue {
    Int(i64),
    /// A real with the maximum number of decimals to print.
    Real(f64, usize),
}

impl NamelistValue {
    fn render(&self) -> String {
        match self {
            NamelistValue::Int(v) => v.to_string(),
            NamelistValue::Real(v, places) => format_decimal(*v, *places),
        }
    }
}

/// A weight-change record (`&wt`) of the NMR restraint section.
#[derive(Debug, Clone, PartialEq)]
pub enum WeightRecord {
    /// Linear change of the thermostat target between two steps.
    Temp0 {
        istep1: u64,
        istep2: u64,
        value1: f64,
        value2: f64,
    },
    End,
}

impl WeightRecord {
    /// The two `TEMP0` records and the terminator implementing a heating ramp.
    pub fn for_ramp(ramp: &TemperatureRamp) -> Vec<WeightRecord> {
        vec![
            WeightRecord::Temp0 {
                istep1: 0,
                istep2: ramp.ramp_end,
                value1: 0.0,
                value2: ramp.target,
            },
            WeightRecord::Temp0 {
                istep1: ramp.hold_start(),
                istep2: ramp.total_steps,
                value1: ramp.target,
                value2: ramp.target,
            },
            WeightRecord::End,
        ]
    }
}

#[derive(Serialize)]
struct EntryView {
    key: String,
    value: String,
}

#[derive(Serialize)]
struct RangeView {
    istep1: u64,
    istep2: u64,
    value1: String,
    value2: String,
}

#[derive(Serialize)]
struct WeightView {
    kind: &'static str,
    range: Option<RangeView>,
}

#[derive(Serialize)]
struct DeckView {
    title: String,
    cntrl: Vec<EntryView>,
    weights: Vec<WeightView>,
}

/// One stage's control input.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlDeck {
    title: String,
    cntrl: Vec<(&'static str, NamelistValue)>,
    weights: Vec<WeightRecord>,
}

impl ControlDeck {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            cntrl: Vec::new(),
            weights: Vec::new(),
        }
    }

    /// Adds an integer namelist entry.
    pub fn int(mut self, key: &'static str, value: i64) -> Self {
        self.cntrl.push((key, NamelistValue::Int(value)));
        self
    }

    /// Adds a step-count entry; step counts are validated as positive on render.
    pub fn steps(self, key: &'static str, value: u64) -> Self {
        self.int(key, i64::try_from(value).unwrap_or(i64::MAX))
    }

    /// Adds a real namelist entry printed with `places` decimals.
    pub fn real(mut self, key: &'static str, value: f64, places: usize) -> Self {
        self.cntrl.push((key, NamelistValue::Real(value, places)));
        self
    }

    pub fn weights(mut self, weights: Vec<WeightRecord>) -> Self {
        self.weights = weights;
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Looks up a namelist entry by key.
    pub fn get(&self, key: &str) -> Option<&NamelistValue> {
        self.cntrl
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, value)| value)
    }

    /// Integer entry by key, if present and integral.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(NamelistValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Real entry by key, if present.
    pub fn get_real(&self, key: &str) -> Option<f64> {
        match self.get(key) {
            Some(NamelistValue::Real(v, _)) => Some(*v),
            _ => None,
        }
    }

    /// Renders the deck into engine input text.
    pub fn render(&self) -> Result<String, TemplateError> {
        for key in ["nstlim", "maxcyc", "ncyc", "ntpr"] {
            if let Some(value) = self.get_int(key) {
                if value <= 0 {
                    return Err(TemplateError::NonPositive { field: key, value });
                }
            }
        }
        for (key, value) in &self.cntrl {
            if let NamelistValue::Real(v, _) = value {
                let printed: f64 = value.render().parse().unwrap_or(0.0);
                if *v != 0.0 && printed == 0.0 {
                    return Err(TemplateError::Unrepresentable { field: *key, value: *v });
                }
            }
        }

        let view = DeckView {
            title: self.title.clone(),
            cntrl: self
                .cntrl
                .iter()
                .map(|(key, value)| EntryView {
                    key: key.to_string(),
                    value: value.render(),
                })
                .collect(),
            weights: self
                .weights
                .iter()
                .map(|record| match record {
                    WeightRecord::Temp0 {
                        istep1,
                        istep2,
                        value1,
                        value2,
                    } => WeightView {
                        kind: "TEMP0",
                        range: Some(RangeView {
                            istep1: *istep1,
                            istep2: *istep2,
                            value1: format_decimal(*value1, 6),
                            value2: format_decimal(*value2, 6),
                        }),
                    },
                    WeightRecord::End => WeightView {
                        kind: "END",
                        range: None,
                    },
                })
                .collect(),
        };

        let context = Context::from_serialize(&view)?;
        let text = Tera::one_off(DECK_TEMPLATE, &context, false)?;
        super::ensure_resolved(&text)?;
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_layout() {
        let deck = ControlDeck::new("Minimize")
            .int("imin", 1)
            .steps("maxcyc", 2000)
            .real("cut", 8.0, 1);
        let text = deck.render().unwrap();
        assert_eq!(
            text,
            "Minimize\n &cntrl\n  imin=1,\n  maxcyc=2000,\n  cut=8.0,\n /\n"
        );
    }

    #[test]
    fn test_render_weight_records() {
        let ramp = TemperatureRamp::heating(10_000, 360.0);
        let deck = ControlDeck::new("Heat")
            .steps("nstlim", 10_000)
            .weights(WeightRecord::for_ramp(&ramp));
        let text = deck.render().unwrap();
        assert!(text.contains(
            "&wt type='TEMP0', istep1=0, istep2=9000, value1=0.0, value2=360.0 /"
        ));
        assert!(text.contains(
            "&wt type='TEMP0', istep1=9001, istep2=10000, value1=360.0, value2=360.0 /"
        ));
        assert!(text.ends_with("&wt type='END' /\n"));
    }

    #[test]
    fn test_rejects_non_positive_step_fields() {
        let deck = ControlDeck::new("Broken").steps("nstlim", 0);
        assert!(matches!(
            deck.render(),
            Err(TemplateError::NonPositive { field: "nstlim", .. })
        ));
    }

    #[test]
    fn test_get_int() {
        let deck = ControlDeck::new("x").int("ntwx", 500).real("dt", 0.002, 3);
        assert_eq!(deck.get_int("ntwx"), Some(500));
        assert_eq!(deck.get_int("dt"), None);
        assert_eq!(deck.get_int("missing"), None);
        assert_eq!(deck.get_real("dt"), Some(0.002));
    }

    #[test]
    fn test_reals_print_without_padding() {
        let deck = ControlDeck::new("x")
            .real("dt", 0.00125, 9)
            .real("temp0", 300.25, 6)
            .real("cut", 9.5, 1);
        let text = deck.render().unwrap();
        assert!(text.contains("  dt=0.00125,\n"));
        assert!(text.contains("  temp0=300.25,\n"));
        assert!(text.contains("  cut=9.5,\n"));
    }

    #[test]
    fn test_rejects_real_printed_as_zero() {
        let deck = ControlDeck::new("x").real("dt", 0.00004, 4);
        assert!(matches!(
            deck.render(),
            Err(TemplateError::Unrepresentable { field: "dt", .. })
        ));
    }
}
