//! Parsing of the engine's live status file (`<stage>.mdinfo`).
//!
//! The engine rewrites the file periodically. Lines of interest look like:
//!
//! ```text
//!  NSTEP =   500000   TIME(PS) =    1020.000  TEMP(K) =   300.03  PRESS =     0.0
//! |         ns/day =      82.26   seconds/ns =    1050.42
//! | Estimated time remaining:       2.6 hours.
//! ```
//!
//! The last occurrence of each wins. Missing values are not an error.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

static NSTEP_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn nstep_pattern() -> Option<&'static Regex> {
    NSTEP_PATTERN
        .get_or_init(|| Regex::new(r"NSTEP\s*=\s*(\d+)").ok())
        .as_ref()
}

/// Progress figures read at one monitor tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSample {
    /// Simulated nanoseconds per wall-clock day.
    pub ns_per_day: Option<f64>,
    /// Estimated time remaining as printed by the engine (`2.6 hours.`).
    pub time_remaining: Option<String>,
    /// Last reported integration step.
    pub nstep: Option<u64>,
}

impl ProgressSample {
    /// Parses status text. Returns `None` when no field is present.
    pub fn parse(text: &str) -> Option<Self> {
        let sample = Self {
            ns_per_day: last_field(text, "ns/day", 3, 1).and_then(|v| v.parse().ok()),
            time_remaining: last_field(text, "time rem", 4, 2),
            nstep: nstep_pattern().and_then(|re| {
                re.captures_iter(text)
                    .last()
                    .and_then(|c| c.get(1))
                    .and_then(|m| m.as_str().parse().ok())
            }),
        };
        if sample.ns_per_day.is_none() && sample.time_remaining.is_none() && sample.nstep.is_none()
        {
            None
        } else {
            Some(sample)
        }
    }

    /// Frames written so far given the trajectory write frequency.
    pub fn frames_written(&self, write_frequency: u64) -> Option<u64> {
        if write_frequency == 0 {
            return None;
        }
        self.nstep.map(|step| step / write_frequency)
    }
}

impl std::fmt::Display for ProgressSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.ns_per_day {
            Some(speed) => write!(f, "ns/day: {}", speed)?,
            None => write!(f, "ns/day: ?")?,
        }
        match self.time_remaining {
            Some(ref left) => write!(f, ", time left: {}", left)?,
            None => write!(f, ", time left: ?")?,
        }
        if let Some(step) = self.nstep {
            write!(f, ", step: {}", step)?;
        }
        Ok(())
    }
}

/// Whitespace fields `skip..skip+take` of the last line containing `needle`.
fn last_field(text: &str, needle: &str, skip: usize, take: usize) -> Option<String> {
    let line = text.lines().rev().find(|line| line.contains(needle))?;
    let fields: Vec<&str> = line.split_whitespace().skip(skip).take(take).collect();
    if fields.len() == take {
        Some(fields.join(" "))
    } else {
        None
    }
}

/// Reads and parses the status file. A missing or unreadable file yields `None`.
pub async fn read_sample(path: &Path) -> Option<ProgressSample> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => ProgressSample::parse(&text),
        Err(e) => {
            tracing::debug!("Status file {} not readable: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MDINFO: &str = r#" NSTEP =   480000   TIME(PS) =    1000.000  TEMP(K) =   359.80  PRESS =     0.0
 NSTEP =   500000   TIME(PS) =    1020.000  TEMP(K) =   360.03  PRESS =     0.0
|  Average timings for last    5000 steps:
|     Elapsed(s) =      10.21 Per Step(ms) =       2.04
|         ns/day =      84.63   seconds/ns =    1020.86
|
|  Average timings for all steps:
|     Elapsed(s) =    1050.42 Per Step(ms) =       2.10
|         ns/day =      82.26   seconds/ns =    1050.42
|
|
|  Estimated time remaining:       2.6 hours.
 ------------------------------------------------------------------------------
"#;

    #[test]
    fn test_parse_takes_last_occurrence() {
        let sample = ProgressSample::parse(MDINFO).unwrap();
        assert_eq!(sample.ns_per_day, Some(82.26));
        assert_eq!(sample.time_remaining.as_deref(), Some("2.6 hours."));
        assert_eq!(sample.nstep, Some(500_000));
    }

    #[test]
    fn test_parse_partial_and_empty() {
        let sample = ProgressSample::parse(" NSTEP =   1000   TIME(PS) = 2.0\n").unwrap();
        assert_eq!(sample.nstep, Some(1000));
        assert!(sample.ns_per_day.is_none());
        assert!(sample.time_remaining.is_none());

        assert!(ProgressSample::parse("").is_none());
        assert!(ProgressSample::parse("garbage\n|  ns/day\n").is_none());
    }

    #[test]
    fn test_frames_written() {
        let sample = ProgressSample::parse(MDINFO).unwrap();
        assert_eq!(sample.frames_written(10_000), Some(50));
        assert_eq!(sample.frames_written(0), None);
    }

    #[test]
    fn test_display() {
        let sample = ProgressSample::parse(MDINFO).unwrap();
        assert_eq!(
            sample.to_string(),
            "ns/day: 82.26, time left: 2.6 hours., step: 500000"
        );
    }

    #[tokio::test]
    async fn test_read_sample_missing_file() {
        let temp = tempfile::TempDir::new().unwrap();
        assert!(read_sample(&temp.path().join("03_Prod.mdinfo")).await.is_none());
    }
}
