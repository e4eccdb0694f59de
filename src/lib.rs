pub mod config;
pub mod devices;
pub mod error;
pub mod paradigm;
pub mod setup;
pub mod staircase;
pub mod utils;

pub use error::{Result, RigError};
