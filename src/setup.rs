use std::io::BufRead;

use colored::Colorize;

use crate::devices::stimulator::IntensityTable;
use crate::error::{Result, RigError};
use crate::staircase::controller::round_intensity;

/// Session parameters collected from the operator before a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantInfo {
    pub id: String,
    /// Intensity of the salient pulses, set per participant.
    pub salient_intensity: f64,
    /// Starting weak intensity for the staircase, half the salient level.
    pub weak_start: f64,
}

fn read_trimmed(input: &mut dyn BufRead) -> Result<String> {
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn ask(input: &mut dyn BufRead, question: &str) -> Result<String> {
    println!("{}", question.cyan());
    read_trimmed(input)
}

/// Interactive session setup. Prompts until the answers are usable, then
/// asks for a final confirmation; a `n` there aborts the session.
pub fn get_participant_info(
    input: &mut dyn BufRead,
    table: &IntensityTable,
) -> Result<ParticipantInfo> {
    let id = loop {
        let answer = ask(input, "Participant ID:")?;
        if !answer.is_empty() {
            break answer;
        }
        println!("{}", "The ID cannot be empty.".red());
    };

    let (salient_intensity, weak_start) = loop {
        let answer = ask(
            input,
            &format!(
                "Salient intensity ({:.1}-{:.1}, steps of 0.1):",
                table.min(),
                table.max()
            ),
        )?;
        let salient: f64 = match answer.parse() {
            Ok(value) => value,
            Err(_) => {
                println!("{}", format!("Not a number: {}", answer).red());
                continue;
            }
        };
        if !table.is_valid(salient) {
            println!("{}", format!("{} is not on the device grid.", salient).red());
            continue;
        }
        let weak = round_intensity(salient / 2.0);
        if !table.is_valid(weak) {
            println!(
                "{}",
                format!("Derived weak start {} is not on the device grid.", weak).red()
            );
            continue;
        }
        break (round_intensity(salient), weak);
    };

    println!(
        "Participant {}: salient {:.1}, weak start {:.1}",
        id, salient_intensity, weak_start
    );
    let confirm = ask(input, "Start the session with these settings? (y/n)")?;
    if confirm != "y" && confirm != "Y" {
        return Err(RigError::SetupAborted(format!(
            "operator declined settings for participant {}",
            id
        )));
    }

    Ok(ParticipantInfo {
        id,
        salient_intensity,
        weak_start,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn run_setup(script: &str) -> Result<ParticipantInfo> {
        let mut input = Cursor::new(script.as_bytes().to_vec());
        get_participant_info(&mut input, &IntensityTable::standard_grid())
    }

    #[test]
    fn accepts_valid_answers() {
        let info = run_setup("p01\n6.0\ny\n").unwrap();
        assert_eq!(info.id, "p01");
        assert!((info.salient_intensity - 6.0).abs() < 1e-9);
        assert!((info.weak_start - 3.0).abs() < 1e-9);
    }

    #[test]
    fn reprompts_on_bad_intensity() {
        let info = run_setup("p02\nabc\n10.5\n4.4\ny\n").unwrap();
        assert!((info.salient_intensity - 4.4).abs() < 1e-9);
        assert!((info.weak_start - 2.2).abs() < 1e-9);
    }

    #[test]
    fn reprompts_on_empty_id() {
        let info = run_setup("\np03\n8.0\ny\n").unwrap();
        assert_eq!(info.id, "p03");
    }

    #[test]
    fn weak_start_is_half_salient_rounded_to_grid() {
        let info = run_setup("p04\n4.5\ny\n").unwrap();
        // 4.5 / 2 = 2.25 rounds to the 0.1 grid.
        assert!((info.weak_start - 2.3).abs() < 1e-9);
    }

    #[test]
    fn declining_confirmation_aborts() {
        let err = run_setup("p05\n6.0\nn\n").unwrap_err();
        assert!(matches!(err, RigError::SetupAborted(_)));
    }

    #[test]
    fn rejects_salient_whose_half_falls_off_grid() {
        // 1.0 is on the grid but 0.5 is below the device minimum.
        let info = run_setup("p06\n1.0\n6.0\ny\n").unwrap();
        assert!((info.salient_intensity - 6.0).abs() < 1e-9);
    }
}
