use std::collections::HashMap;
use std::io::BufRead;
use std::thread;
use std::time::{Duration, Instant};

use colored::Colorize;

use tactile_rig::config::{load_config, Config, ResponsePadSettings};
use tactile_rig::devices::response_pad::{IdleLineReader, ResponsePad, ResponsePadConfig};
use tactile_rig::devices::stimulator::{FakeStimulator, IntensityTable};
use tactile_rig::devices::triggers::{
    raise_and_lower, reset_ports, FakeTriggerPort, TriggerMap, TriggerPort,
};
use tactile_rig::devices::Stimulator;
use tactile_rig::error::{Result, RigError};
use tactile_rig::paradigm::discrimination::{DiscriminationTask, StdinPrompt};
use tactile_rig::paradigm::events::{
    build_schedule, estimate_duration, generate_block_order, EventKind, ScheduleEntry,
};
use tactile_rig::paradigm::expectation::{self, ExpectationTask};
use tactile_rig::paradigm::Finger;
use tactile_rig::setup::get_participant_info;
use tactile_rig::utils::log::{log_to_file, unique_logfile_path, PairLogger, TrialLogger};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        usage();
        return;
    }

    let config_path = match parse_config_path(&args) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("{}", format!("error: {}", e).red());
            usage();
            std::process::exit(2);
        }
    };
    let result = match args[1].as_str() {
        "discrimination" => run_discrimination(config_path),
        "expectation" => run_expectation(config_path),
        "trig-test" => run_trigger_test(config_path),
        "button-test" => run_button_test(config_path),
        "reset-ports" => run_reset_ports(config_path),
        _ => {
            usage();
            return;
        }
    };

    if let Err(e) = result {
        eprintln!("{}", format!("error: {}", e).red());
        std::process::exit(1);
    }
}

fn usage() {
    println!(
        "usage: main <discrimination|expectation|trig-test|button-test|reset-ports> [--config config.yaml]"
    );
}

fn parse_config_path(args: &[String]) -> Result<Option<&str>> {
    match args.get(2).map(String::as_str) {
        Some("--config") => match args.get(3) {
            Some(path) => Ok(Some(path.as_str())),
            None => Err(RigError::Config("--config needs a path".to_string())),
        },
        other => Ok(other),
    }
}

fn load_or_default(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => load_config(path),
        None => Ok(Config::default()),
    }
}

/// The device calibration table, or the standard 0.1 grid when no
/// calibration file is configured.
fn intensity_table(config: &Config) -> Result<IntensityTable> {
    match &config.experiment.intensity_code_path {
        Some(path) => IntensityTable::from_csv(path),
        None => Ok(IntensityTable::standard_grid()),
    }
}

fn pad_config(settings: &ResponsePadSettings) -> ResponsePadConfig {
    ResponsePadConfig {
        device: settings.device.clone(),
        port: settings.port.clone(),
        num_lines: settings.num_lines,
        poll_interval: Duration::from_micros(settings.poll_interval_us),
        debounce: Duration::from_millis(settings.debounce_ms),
        mapping: settings.mapping.clone(),
    }
}

fn build_stimulators(
    table: &IntensityTable,
    intensity: f64,
) -> HashMap<Finger, Box<dyn Stimulator>> {
    let mut stimulators: HashMap<Finger, Box<dyn Stimulator>> = HashMap::new();
    for finger in [Finger::Middle, Finger::Index] {
        stimulators.insert(
            finger,
            Box::new(FakeStimulator::new(
                finger.as_str(),
                table.clone(),
                intensity,
            )),
        );
    }
    stimulators
}

fn build_pad(settings: &ResponsePadSettings) -> ResponsePad {
    let config = pad_config(settings);
    let reader = IdleLineReader::new(config.num_lines);
    ResponsePad::new(config, Box::new(reader))
}

fn ask_yes_no(question: &str) -> Result<bool> {
    loop {
        println!("{}", format!("{} (y/n)", question).cyan());
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        match line.trim() {
            "y" | "Y" => return Ok(true),
            "n" | "N" => return Ok(false),
            _ => {}
        }
    }
}

fn ask_intensity(table: &IntensityTable) -> Result<f64> {
    loop {
        println!(
            "{}",
            format!("New salient intensity ({:.1}-{:.1}):", table.min(), table.max()).cyan()
        );
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        if let Ok(value) = line.trim().parse::<f64>() {
            if table.is_valid(value) {
                return Ok(value);
            }
        }
        println!("{}", "Not on the device grid.".red());
    }
}

fn run_discrimination(config_path: Option<&str>) -> Result<()> {
    let config = load_or_default(config_path)?;
    let table = intensity_table(&config)?;
    let info = get_participant_info(&mut std::io::stdin().lock(), &table)?;

    let practice_isi = config
        .experiment
        .isis
        .first()
        .copied()
        .ok_or_else(|| RigError::Config("no ISIs configured".to_string()))?;

    let mut rng = rand::thread_rng();
    let order = generate_block_order(
        config.experiment.isis.len(),
        config.experiment.n_repeats,
        &mut rng,
    )?;
    let schedule = build_schedule(
        &order,
        &config.experiment.isis,
        config.experiment.n_sequences,
        config.experiment.prop_targets,
        config.experiment.reset_quest,
        &mut rng,
    );

    let n_trials = schedule
        .iter()
        .filter(|e| matches!(e, ScheduleEntry::Trial(_)))
        .count();
    let minutes = estimate_duration(
        &order,
        &config.experiment.isis,
        config.experiment.n_sequences,
        60.0,
    ) / 60.0;
    println!(
        "{}",
        format!(
            "{} stimulation events across {} schedule entries, about {:.0} minutes.",
            n_trials,
            schedule.len(),
            minutes
        )
        .cyan()
    );

    let mut task = DiscriminationTask::new(
        config.experiment.clone(),
        &config.quest,
        TriggerMap::default(),
        Box::new(FakeTriggerPort::new(&config.triggers.channel)),
        build_stimulators(&table, info.salient_intensity),
        build_pad(&config.response_pad),
        Box::new(StdinPrompt),
        info.salient_intensity,
        info.weak_start,
    )?;

    while ask_yes_no("Run a practice block?")? {
        task.trial_block(practice_isi, 2)?;
        println!(
            "{}",
            format!("Practice done, weak intensity now {:.1}.", task.weak_intensity()).cyan()
        );
        if ask_yes_no("Change the salient intensity?")? {
            let salient = ask_intensity(&table)?;
            task.set_salient_intensity(salient)?;
        }
    }

    let log_path = unique_logfile_path(&config.experiment.output_dir, &info.id);
    let mut logger = TrialLogger::create(&log_path)?;
    log_to_file(
        "sessions.log",
        &format!(
            "discrimination, participant {}, data at {}",
            info.id,
            log_path.display()
        ),
    )?;

    task.set_send_trigger(true);
    task.run(&schedule, &mut logger)?;

    println!(
        "{}",
        format!("Done. Data written to {}.", log_path.display()).green()
    );
    Ok(())
}

fn run_expectation(config_path: Option<&str>) -> Result<()> {
    let config = load_or_default(config_path)?;
    let table = intensity_table(&config)?;
    let info = get_participant_info(&mut std::io::stdin().lock(), &table)?;

    let mut rng = rand::thread_rng();
    let blocks = expectation::prep_blocks(&config.expectation, &mut rng);
    let n_trials: usize = blocks.iter().map(Vec::len).sum();
    let minutes = expectation::estimate_duration(&config.expectation, &blocks) / 60.0;
    println!(
        "{}",
        format!(
            "{} stimulus pairs in {} blocks, about {:.0} minutes.",
            n_trials,
            blocks.len(),
            minutes
        )
        .cyan()
    );

    let mut task = ExpectationTask::new(
        config.expectation.clone(),
        Box::new(FakeTriggerPort::new(&config.triggers.channel)),
        build_stimulators(&table, info.salient_intensity),
        build_pad(&config.response_pad),
        Box::new(StdinPrompt),
    );

    let log_path = unique_logfile_path(&config.experiment.output_dir, &info.id);
    let mut logger = PairLogger::create(&log_path)?;
    log_to_file(
        "sessions.log",
        &format!(
            "expectation, participant {}, data at {}",
            info.id,
            log_path.display()
        ),
    )?;

    task.run(&blocks, &mut logger)?;

    println!(
        "{}",
        format!("Done. Data written to {}.", log_path.display()).green()
    );
    Ok(())
}

/// Walk through every discrimination trigger code so the acquisition side
/// can verify its event channels.
fn run_trigger_test(config_path: Option<&str>) -> Result<()> {
    let config = load_or_default(config_path)?;
    let mut port: Box<dyn TriggerPort> = Box::new(FakeTriggerPort::new(&config.triggers.channel));
    let map = TriggerMap::default();
    let width = Duration::from_secs_f64(config.experiment.trigger_pulse_ms / 1000.0);

    let codes = [
        map.event(&EventKind::Salient),
        map.event(&EventKind::Target(Finger::Middle)),
        map.event(&EventKind::Target(Finger::Index)),
        map.response(Finger::Middle, true),
        map.response(Finger::Middle, false),
        map.response(Finger::Index, true),
        map.response(Finger::Index, false),
        map.break_start,
        map.break_end,
        map.experiment_start,
        map.experiment_end,
    ];

    for code in codes {
        println!("sending trigger {}", code);
        raise_and_lower(port.as_mut(), code, width)?;
        thread::sleep(Duration::from_millis(500));
    }
    Ok(())
}

/// Listen on the response pad and print every press for 20 seconds.
fn run_button_test(config_path: Option<&str>) -> Result<()> {
    let config = load_or_default(config_path)?;
    let mut pad = build_pad(&config.response_pad);
    println!(
        "{}",
        format!("Listening on {}. Press the pad buttons.", pad.channel()).cyan()
    );

    pad.start();
    let deadline = Instant::now() + Duration::from_secs(20);
    while Instant::now() < deadline {
        if let Some(press) = pad.take_response() {
            println!("{}", format!("button {}", press.label).green());
        }
        thread::sleep(Duration::from_millis(2));
    }
    pad.stop();
    Ok(())
}

/// Lower every line on the configured trigger ports after an aborted run.
fn run_reset_ports(config_path: Option<&str>) -> Result<()> {
    let config = load_or_default(config_path)?;
    let mut ports: Vec<Box<dyn TriggerPort>> = config
        .triggers
        .reset_channels
        .iter()
        .map(|channel| Box::new(FakeTriggerPort::new(channel)) as Box<dyn TriggerPort>)
        .collect();
    reset_ports(&mut ports)?;
    println!(
        "{}",
        format!("Lowered all lines on {} ports.", ports.len()).green()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(rest: &[&str]) -> Vec<String> {
        let mut all = vec!["main".to_string()];
        all.extend(rest.iter().map(|s| s.to_string()));
        all
    }

    #[test]
    fn config_flag_requires_a_path() {
        assert!(parse_config_path(&args(&["discrimination", "--config"])).is_err());
    }

    #[test]
    fn config_path_may_be_flagged_or_positional() {
        let flagged = args(&["discrimination", "--config", "rig.yaml"]);
        assert_eq!(parse_config_path(&flagged).unwrap(), Some("rig.yaml"));

        let positional = args(&["discrimination", "rig.yaml"]);
        assert_eq!(parse_config_path(&positional).unwrap(), Some("rig.yaml"));

        assert_eq!(parse_config_path(&args(&["discrimination"])).unwrap(), None);
    }

    #[test]
    fn calibration_table_loads_when_configured() {
        let dir = std::env::temp_dir().join("tactile_rig_main_tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("intensity_code.csv");
        std::fs::write(&path, "intensity,code\n1.0,17\n1.1,21\n").unwrap();

        let mut config = Config::default();
        config.experiment.intensity_code_path = Some(path);
        let table = intensity_table(&config).unwrap();
        assert_eq!(table.code_for(1.1).unwrap(), 21);
        assert!(!table.is_valid(6.0));

        // Without a calibration file the rig falls back to the full grid.
        let table = intensity_table(&Config::default()).unwrap();
        assert!(table.is_valid(6.0));
    }
}
