use std::thread;
use std::time::Duration;

use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::paradigm::events::EventKind;
use crate::paradigm::Finger;

/// Bit components the discrimination trigger codes are assembled from.
/// Each recorded event is the sum of the bits that describe it, so the
/// analysis can mask codes apart again.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TriggerComponents {
    pub stim: u8,
    pub target: u8,
    pub middle: u8,
    pub index: u8,
    pub response: u8,
    pub correct: u8,
    pub incorrect: u8,
}

impl Default for TriggerComponents {
    fn default() -> Self {
        Self {
            stim: 1,
            target: 2,
            middle: 4,
            index: 8,
            response: 16,
            correct: 32,
            incorrect: 64,
        }
    }
}

/// The discrimination paradigm's trigger code table.
#[derive(Debug, Clone)]
pub struct TriggerMap {
    components: TriggerComponents,
    pub break_start: u8,
    pub break_end: u8,
    pub experiment_start: u8,
    pub experiment_end: u8,
}

impl TriggerMap {
    pub fn new(components: TriggerComponents) -> Self {
        Self {
            components,
            break_start: 128,
            break_end: 129,
            experiment_start: 254,
            experiment_end: 255,
        }
    }

    fn finger_bit(&self, finger: Finger) -> u8 {
        match finger {
            Finger::Middle => self.components.middle,
            Finger::Index => self.components.index,
        }
    }

    pub fn event(&self, kind: &EventKind) -> u8 {
        match kind {
            EventKind::Salient => self.components.stim,
            EventKind::Target(finger) => self.components.target + self.finger_bit(*finger),
        }
    }

    pub fn response(&self, finger: Finger, correct: bool) -> u8 {
        let outcome = if correct {
            self.components.correct
        } else {
            self.components.incorrect
        };
        self.components.response + self.finger_bit(finger) + outcome
    }
}

impl Default for TriggerMap {
    fn default() -> Self {
        Self::new(TriggerComponents::default())
    }
}

/// Trigger codes of the expectation paradigm, recorded as 8-bit line
/// patterns on the acquisition side. The values reproduce the rig's wiring
/// table and are not derived.
#[derive(Debug, Clone, Default)]
pub struct ExpectationTriggers;

impl ExpectationTriggers {
    pub fn first(&self, finger: Finger) -> u8 {
        match finger {
            Finger::Index => 3,  // lines 0+1
            Finger::Middle => 5, // lines 0+2
        }
    }

    pub fn second(&self, finger: Finger, expected: bool, repeated: bool) -> u8 {
        match (finger, expected, repeated) {
            (Finger::Index, true, true) => 19,
            (Finger::Index, true, false) => 3,
            (Finger::Index, false, true) => 21,
            (Finger::Index, false, false) => 5,
            (Finger::Middle, _, true) => 21,
            (Finger::Middle, _, false) => 5,
        }
    }

    pub fn response(&self) -> u8 {
        8
    }

    pub fn break_start(&self) -> u8 {
        32
    }

    pub fn break_end(&self) -> u8 {
        64
    }
}

/// An 8-line digital output the trigger codes are written to.
pub trait TriggerPort: Send {
    fn write_code(&mut self, code: u8) -> Result<()>;
}

/// Prints the codes it would write. Used when the DAQ is absent and in
/// tests.
pub struct FakeTriggerPort {
    channel: String,
}

impl FakeTriggerPort {
    pub fn new(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
        }
    }
}

impl TriggerPort for FakeTriggerPort {
    fn write_code(&mut self, code: u8) -> Result<()> {
        if code != 0 {
            println!(
                "{}",
                format!("TRIG {} ({}, fake)", code, self.channel).yellow()
            );
        }
        Ok(())
    }
}

/// Raise a code on the lines, hold it for `width`, then lower the lines.
pub fn raise_and_lower(port: &mut dyn TriggerPort, code: u8, width: Duration) -> Result<()> {
    port.write_code(code)?;
    thread::sleep(width);
    port.write_code(0)
}

/// Lower every line on the given ports. Run after an aborted session so no
/// line is left high for the next recording.
pub fn reset_ports(ports: &mut [Box<dyn TriggerPort>]) -> Result<()> {
    for port in ports.iter_mut() {
        port.write_code(0)?;
    }
    Ok(())
}
