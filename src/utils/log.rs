use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::error::Result;

/// Append a timestamped message to a session log under `logs/`.
pub fn log_to_file(filename: &str, message: &str) -> std::io::Result<()> {
    let log_dir = "logs";
    if !Path::new(log_dir).exists() {
        std::fs::create_dir_all(log_dir)?;
    }

    let path = format!("{}/{}", log_dir, filename);
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;

    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    writeln!(file, "[{}] {}", timestamp, message)?;
    file.flush()?;

    Ok(())
}

/// Pick a per-participant log path that does not clobber an earlier session:
/// `<pid>_behavioural_data.csv`, then `_1`, `_2`, ... suffixes.
pub fn unique_logfile_path(dir: &Path, participant_id: &str) -> PathBuf {
    let mut path = dir.join(format!("{}_behavioural_data.csv", participant_id));
    let mut suffix = 1;
    while path.exists() {
        path = dir.join(format!(
            "{}_behavioural_data_{}.csv",
            participant_id, suffix
        ));
        suffix += 1;
    }
    path
}

fn fmt_opt<T: ToString>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "NA".to_string())
}

/// One row of the discrimination paradigm's trial log. Fields the event did
/// not produce are written as `NA`.
#[derive(Debug, Clone)]
pub struct TrialRow {
    pub time: f64,
    pub block: String,
    pub isi: Option<f64>,
    pub intensity: Option<f64>,
    pub event_type: String,
    pub trigger: Option<u8>,
    pub n_in_block: Option<usize>,
    pub correct: Option<bool>,
    pub quest_reset: bool,
    pub rt: Option<f64>,
}

impl TrialRow {
    /// A row for start/end/break markers: only time, type and trigger.
    pub fn marker(time: f64, block: &str, event_type: &str, trigger: u8) -> Self {
        Self {
            time,
            block: block.to_string(),
            isi: None,
            intensity: None,
            event_type: event_type.to_string(),
            trigger: Some(trigger),
            n_in_block: None,
            correct: None,
            quest_reset: false,
            rt: None,
        }
    }
}

/// CSV trial logger for the discrimination paradigm.
pub struct TrialLogger {
    writer: csv::Writer<File>,
}

impl TrialLogger {
    pub const HEADER: [&'static str; 10] = [
        "time",
        "block",
        "ISI",
        "intensity",
        "event_type",
        "trigger",
        "n_in_block",
        "correct",
        "QUEST_reset",
        "rt",
    ];

    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(Self::HEADER)?;
        writer.flush()?;
        Ok(Self { writer })
    }

    pub fn log(&mut self, row: &TrialRow) -> Result<()> {
        self.writer.write_record([
            format!("{:.4}", row.time),
            row.block.clone(),
            fmt_opt(&row.isi),
            fmt_opt(&row.intensity),
            row.event_type.clone(),
            fmt_opt(&row.trigger),
            fmt_opt(&row.n_in_block),
            fmt_opt(&row.correct.map(|c| c as u8)),
            (row.quest_reset as u8).to_string(),
            fmt_opt(&row.rt),
        ])?;
        self.writer.flush()?;
        Ok(())
    }
}

/// One row of the expectation paradigm's log.
#[derive(Debug, Clone)]
pub struct PairRow {
    pub block: String,
    pub stim_site_first: Option<String>,
    pub time_first: Option<f64>,
    pub stim_site_second: Option<String>,
    pub time_second: Option<f64>,
    pub repeated: Option<bool>,
    pub expected: Option<bool>,
    pub response: Option<String>,
    pub rt: Option<f64>,
    pub correct: Option<bool>,
}

impl PairRow {
    pub fn marker(block: &str, time: f64) -> Self {
        Self {
            block: block.to_string(),
            stim_site_first: None,
            time_first: Some(time),
            stim_site_second: None,
            time_second: None,
            repeated: None,
            expected: None,
            response: None,
            rt: None,
            correct: None,
        }
    }
}

/// CSV trial logger for the expectation paradigm.
pub struct PairLogger {
    writer: csv::Writer<File>,
}

impl PairLogger {
    pub const HEADER: [&'static str; 10] = [
        "block",
        "stim_site_first",
        "time_first",
        "stim_site_second",
        "time_second",
        "repeated",
        "expected",
        "response",
        "RT",
        "correct",
    ];

    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(Self::HEADER)?;
        writer.flush()?;
        Ok(Self { writer })
    }

    pub fn log(&mut self, row: &PairRow) -> Result<()> {
        self.writer.write_record([
            row.block.clone(),
            fmt_opt(&row.stim_site_first),
            fmt_opt(&row.time_first),
            fmt_opt(&row.stim_site_second),
            fmt_opt(&row.time_second),
            fmt_opt(&row.repeated.map(|r| r as u8)),
            fmt_opt(&row.expected.map(|e| e as u8)),
            fmt_opt(&row.response),
            fmt_opt(&row.rt),
            fmt_opt(&row.correct.map(|c| c as u8)),
        ])?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("tactile_rig_log_tests")
            .join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn trial_log_writes_header_and_na_fields() {
        let dir = temp_dir("trial");
        let path = dir.join("out.csv");
        let mut logger = TrialLogger::create(&path).unwrap();
        logger
            .log(&TrialRow::marker(0.1234, "NA", "experiment/start", 254))
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(
            lines.next().unwrap(),
            "time,block,ISI,intensity,event_type,trigger,n_in_block,correct,QUEST_reset,rt"
        );
        assert_eq!(
            lines.next().unwrap(),
            "0.1234,NA,NA,NA,experiment/start,254,NA,NA,0,NA"
        );
    }

    #[test]
    fn logfile_path_avoids_collisions() {
        let dir = temp_dir("paths");
        let first = unique_logfile_path(&dir, "p01");
        assert_eq!(first, dir.join("p01_behavioural_data.csv"));

        std::fs::write(&first, "x").unwrap();
        let second = unique_logfile_path(&dir, "p01");
        assert_eq!(second, dir.join("p01_behavioural_data_1.csv"));

        std::fs::write(&second, "x").unwrap();
        let third = unique_logfile_path(&dir, "p01");
        assert_eq!(third, dir.join("p01_behavioural_data_2.csv"));
    }

    #[test]
    fn pair_log_writes_full_rows() {
        let dir = temp_dir("pair");
        let path = dir.join("pairs.csv");
        let mut logger = PairLogger::create(&path).unwrap();
        logger
            .log(&PairRow {
                block: "0".to_string(),
                stim_site_first: Some("middle".to_string()),
                time_first: Some(1.5),
                stim_site_second: Some("index".to_string()),
                time_second: Some(2.04),
                repeated: Some(false),
                expected: Some(true),
                response: Some("b".to_string()),
                rt: Some(0.412),
                correct: Some(true),
            })
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents.lines().nth(1).unwrap(),
            "0,middle,1.5,index,2.04,0,1,b,0.412,1"
        );
    }
}
