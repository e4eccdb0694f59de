use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, RigError};
use crate::staircase::QuestSettings;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    pub experiment: ExperimentConfig,
    pub quest: QuestConfig,
    pub expectation: ExpectationConfig,
    pub response_pad: ResponsePadSettings,
    pub triggers: TriggerSettings,
}

/// Parameters of the discrimination paradigm.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ExperimentConfig {
    /// Inter-stimulus intervals defining the block types, in seconds.
    pub isis: Vec<f64>,
    /// How many transition-complete segments to run.
    pub n_repeats: usize,
    /// Sequences (3 salient + 1 target) per block.
    pub n_sequences: usize,
    /// Re-seed the staircase every this many blocks. None disables resets.
    pub reset_quest: Option<usize>,
    /// Proportion of middle vs index targets.
    pub prop_targets: [f64; 2],
    /// Stimulator pulse duration in microseconds.
    pub stim_duration_us: u32,
    /// How long a trigger code is held on the lines, in milliseconds.
    pub trigger_pulse_ms: f64,
    /// Settle time after a break before stimulation resumes, in seconds.
    pub break_settle_s: f64,
    /// Salient intensity minus this gives the weak-intensity ceiling.
    pub weak_ceiling_gap: f64,
    pub output_dir: PathBuf,
    /// Per-device intensity calibration CSV; the standard 0.1 grid when
    /// unset.
    #[serde(default)]
    pub intensity_code_path: Option<PathBuf>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            isis: vec![1.29, 1.44, 1.57, 1.71],
            n_repeats: 4,
            n_sequences: 8,
            reset_quest: Some(2),
            prop_targets: [0.5, 0.5],
            stim_duration_us: 100,
            trigger_pulse_ms: 5.0,
            break_settle_s: 2.0,
            weak_ceiling_gap: 0.5,
            output_dir: PathBuf::from("output"),
            intensity_code_path: None,
        }
    }
}

/// Staircase parameters; the start value and ceiling come from the
/// participant setup, everything else from here.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QuestConfig {
    pub target: f64,
    pub beta: f64,
    pub gamma: f64,
    pub delta: f64,
    pub start_val_sd: f64,
    pub grain: f64,
}

impl Default for QuestConfig {
    fn default() -> Self {
        Self {
            target: 0.75,
            beta: 3.5,
            gamma: 0.5,
            delta: 0.01,
            start_val_sd: 1.0,
            grain: 0.1,
        }
    }
}

impl QuestConfig {
    /// Expand into full estimator settings for a given start value and
    /// weak-intensity ceiling.
    pub fn settings(&self, start_val: f64, max_weak: f64) -> QuestSettings {
        QuestSettings {
            start_val,
            start_val_sd: self.start_val_sd,
            min_val: 1.0,
            max_val: max_weak,
            p_threshold: self.target,
            beta: self.beta,
            gamma: self.gamma,
            delta: self.delta,
            grain: self.grain,
        }
    }
}

/// Parameters of the expectation paradigm.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ExpectationConfig {
    /// Interval between the first and second pulse of a pair, in seconds.
    pub isi: f64,
    pub n_events_per_block: usize,
    pub n_repeats_per_block: usize,
    /// Response window after the second pulse, in seconds.
    pub max_response_time: f64,
    /// Inter-pair interval range, drawn uniformly, in seconds.
    pub ipi_range: (f64, f64),
    /// Proportion of expected vs unexpected second stimuli.
    pub prop_expected: [f64; 2],
    /// Settle time after a break before stimulation resumes, in seconds.
    pub break_settle_s: f64,
}

impl Default for ExpectationConfig {
    fn default() -> Self {
        Self {
            isi: 0.54,
            n_events_per_block: 100,
            n_repeats_per_block: 2,
            max_response_time: 2.0,
            ipi_range: (1.0, 1.5),
            prop_expected: [0.75, 0.25],
            break_settle_s: 2.0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponsePadSettings {
    pub device: String,
    pub port: String,
    pub num_lines: usize,
    pub poll_interval_us: u64,
    pub debounce_ms: u64,
    pub mapping: HashMap<usize, String>,
}

impl Default for ResponsePadSettings {
    fn default() -> Self {
        let mut mapping = HashMap::new();
        mapping.insert(0, "b".to_string());
        mapping.insert(1, "y".to_string());
        Self {
            device: "Dev1".to_string(),
            port: "port6".to_string(),
            num_lines: 4,
            poll_interval_us: 500,
            debounce_ms: 50,
            mapping,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TriggerSettings {
    /// Digital output channel the trigger codes go to.
    pub channel: String,
    /// All channels lowered by the port-reset utility.
    pub reset_channels: Vec<String>,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            channel: "Dev1/port5/line0:7".to_string(),
            reset_channels: vec![
                "Dev1/port9/line0:7".to_string(),
                "Dev1/port0/line0:7".to_string(),
                "Dev1/port3/line0:7".to_string(),
            ],
        }
    }
}

fn check_proportions(name: &str, props: [f64; 2]) -> Result<()> {
    if props.iter().any(|p| *p < 0.0) || (props[0] + props[1] - 1.0).abs() > 1e-6 {
        return Err(RigError::Config(format!(
            "{} must be non-negative and sum to 1, got {:?}",
            name, props
        )));
    }
    Ok(())
}

impl Config {
    /// Reject parameter combinations the rig cannot run with.
    pub fn validate(&self) -> Result<()> {
        check_proportions("experiment.prop_targets", self.experiment.prop_targets)?;
        check_proportions("expectation.prop_expected", self.expectation.prop_expected)?;
        Ok(())
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let config_str = fs::read_to_string(path)?;
    let config: Config = serde_yaml::from_str(&config_str)?;
    config.validate()?;
    Ok(config)
}

pub fn save_config<P: AsRef<Path>>(config: &Config, path: P) -> Result<()> {
    let yaml = serde_yaml::to_string(config)?;
    fs::write(path, yaml)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_rig() {
        let config = Config::default();
        assert_eq!(config.experiment.isis, vec![1.29, 1.44, 1.57, 1.71]);
        assert_eq!(config.experiment.reset_quest, Some(2));
        assert!((config.quest.target - 0.75).abs() < 1e-9);
        assert_eq!(config.response_pad.mapping.get(&1).unwrap(), "y");
    }

    #[test]
    fn partial_yaml_is_an_error_not_a_panic() {
        let result: std::result::Result<Config, _> = serde_yaml::from_str("experiment: {}");
        assert!(result.is_err());
    }

    #[test]
    fn config_parses_from_yaml() {
        let yaml = r#"
experiment:
  isis: [1.0, 2.0]
  n_repeats: 2
  n_sequences: 4
  reset_quest: 3
  prop_targets: [0.5, 0.5]
  stim_duration_us: 100
  trigger_pulse_ms: 5.0
  break_settle_s: 2.0
  weak_ceiling_gap: 0.5
  output_dir: out
quest:
  target: 0.6
  beta: 3.5
  gamma: 0.5
  delta: 0.01
  start_val_sd: 1.0
  grain: 0.1
expectation:
  isi: 0.54
  n_events_per_block: 100
  n_repeats_per_block: 2
  max_response_time: 2.0
  ipi_range: [1.0, 1.5]
  prop_expected: [0.75, 0.25]
  break_settle_s: 2.0
response_pad:
  device: Dev1
  port: port6
  num_lines: 4
  poll_interval_us: 500
  debounce_ms: 50
  mapping:
    0: b
    1: y
triggers:
  channel: Dev1/port5/line0:7
  reset_channels: []
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.experiment.isis.len(), 2);
        assert_eq!(config.experiment.reset_quest, Some(3));
        assert!((config.quest.target - 0.6).abs() < 1e-9);

        let settings = config.quest.settings(2.0, 5.5);
        assert!((settings.max_val - 5.5).abs() < 1e-9);
        assert!((settings.p_threshold - 0.6).abs() < 1e-9);

        // Calibration path is optional and absent here.
        assert_eq!(config.experiment.intensity_code_path, None);
    }

    #[test]
    fn calibration_path_parses_when_present() {
        let yaml = r#"
isis: [1.29]
n_repeats: 1
n_sequences: 2
reset_quest: null
prop_targets: [0.5, 0.5]
stim_duration_us: 100
trigger_pulse_ms: 5.0
break_settle_s: 2.0
weak_ceiling_gap: 0.5
output_dir: out
intensity_code_path: calib/intensity_code.csv
"#;
        let config: ExperimentConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.intensity_code_path,
            Some(PathBuf::from("calib/intensity_code.csv"))
        );
    }

    #[test]
    fn out_of_range_proportions_are_rejected() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.experiment.prop_targets = [1.2, -0.2];
        assert!(config.validate().is_err());

        config.experiment.prop_targets = [0.5, 0.5];
        config.expectation.prop_expected = [0.9, 0.2];
        assert!(config.validate().is_err());
    }
}
