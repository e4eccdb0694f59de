//! Error types for tactile-rig

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RigError {
    /// Configuration file problem
    #[error("Config error: {0}")]
    Config(String),

    /// Stimulator or digital I/O problem
    #[error("Device error: {0}")]
    Device(String),

    /// Block order construction failed
    #[error("Scheduling error: {0}")]
    Scheduling(String),

    /// Intensity not present in the device code table
    #[error("Intensity {0} is not on the device intensity grid")]
    InvalidIntensity(f64),

    /// Operator aborted during setup
    #[error("Setup aborted: {0}")]
    SetupAborted(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, RigError>;
