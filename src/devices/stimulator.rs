use std::path::Path;

use colored::Colorize;

use crate::error::{Result, RigError};
use crate::staircase::controller::round_intensity;

/// Maps stimulation intensities to the codes the stimulator accepts.
///
/// Loaded from the per-device calibration CSV shipped with the rig
/// (`intensity,code` rows); `standard_grid` covers the usual 1.0..=10.0
/// range in 0.1 steps when no calibration file is available.
#[derive(Debug, Clone)]
pub struct IntensityTable {
    entries: Vec<(f64, u16)>,
}

impl IntensityTable {
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut entries = Vec::new();
        for record in reader.records() {
            let record = record?;
            let intensity: f64 = record
                .get(0)
                .and_then(|field| field.trim().parse().ok())
                .ok_or_else(|| RigError::Config("bad intensity column".to_string()))?;
            let code: u16 = record
                .get(1)
                .and_then(|field| field.trim().parse().ok())
                .ok_or_else(|| RigError::Config("bad code column".to_string()))?;
            entries.push((round_intensity(intensity), code));
        }
        if entries.is_empty() {
            return Err(RigError::Config("empty intensity code table".to_string()));
        }
        Ok(Self { entries })
    }

    pub fn standard_grid() -> Self {
        let entries = (10..=100)
            .map(|tenths| (tenths as f64 / 10.0, tenths as u16))
            .collect();
        Self { entries }
    }

    pub fn is_valid(&self, intensity: f64) -> bool {
        self.code_for(intensity).is_ok()
    }

    pub fn code_for(&self, intensity: f64) -> Result<u16> {
        let wanted = round_intensity(intensity);
        self.entries
            .iter()
            .find(|(level, _)| (level - wanted).abs() < 1e-9)
            .map(|(_, code)| *code)
            .ok_or(RigError::InvalidIntensity(intensity))
    }

    pub fn min(&self) -> f64 {
        self.entries
            .iter()
            .map(|(level, _)| *level)
            .fold(f64::INFINITY, f64::min)
    }

    pub fn max(&self) -> f64 {
        self.entries
            .iter()
            .map(|(level, _)| *level)
            .fold(f64::NEG_INFINITY, f64::max)
    }
}

/// A finger stimulator. The serial protocol behind the real device is out of
/// scope here; the experiment code only drives this surface.
pub trait Stimulator: Send {
    fn send_pulse(&mut self) -> Result<()>;
    fn change_intensity(&mut self, intensity: f64) -> Result<()>;
    fn set_pulse_duration(&mut self, micros: u32) -> Result<()>;
    fn intensity(&self) -> f64;
}

/// Stand-in stimulator used when no hardware is attached and in tests.
/// Validates intensities against the code table and prints what the device
/// would do.
pub struct FakeStimulator {
    label: String,
    table: IntensityTable,
    intensity: f64,
    pulse_micros: u32,
    verbose: bool,
}

impl FakeStimulator {
    pub fn new(label: &str, table: IntensityTable, start_intensity: f64) -> Self {
        Self {
            label: label.to_string(),
            table,
            intensity: start_intensity,
            pulse_micros: 100,
            verbose: true,
        }
    }

    pub fn silent(label: &str, table: IntensityTable, start_intensity: f64) -> Self {
        let mut stimulator = Self::new(label, table, start_intensity);
        stimulator.verbose = false;
        stimulator
    }

    pub fn pulse_duration_micros(&self) -> u32 {
        self.pulse_micros
    }
}

impl Stimulator for FakeStimulator {
    fn send_pulse(&mut self) -> Result<()> {
        if self.verbose {
            println!(
                "{}",
                format!(
                    "pulse -> {} at {:.1} ({} us) (fake)",
                    self.label, self.intensity, self.pulse_micros
                )
                .dimmed()
            );
        }
        Ok(())
    }

    fn change_intensity(&mut self, intensity: f64) -> Result<()> {
        let code = self.table.code_for(intensity)?;
        self.intensity = round_intensity(intensity);
        if self.verbose {
            println!(
                "{}",
                format!(
                    "{} intensity -> {:.1} (code {}) (fake)",
                    self.label, self.intensity, code
                )
                .dimmed()
            );
        }
        Ok(())
    }

    fn set_pulse_duration(&mut self, micros: u32) -> Result<()> {
        self.pulse_micros = micros;
        Ok(())
    }

    fn intensity(&self) -> f64 {
        self.intensity
    }
}
