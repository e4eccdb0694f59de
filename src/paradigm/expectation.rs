use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

use colored::Colorize;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::ExpectationConfig;
use crate::devices::response_pad::ResponsePad;
use crate::devices::triggers::{raise_and_lower, ExpectationTriggers, TriggerPort};
use crate::devices::Stimulator;
use crate::error::Result;
use crate::paradigm::discrimination::OperatorPrompt;
use crate::paradigm::{response_matches, Finger};
use crate::utils::log::{PairLogger, PairRow};

const RESPONSE_POLL: Duration = Duration::from_micros(500);
const TRIGGER_WIDTH: Duration = Duration::from_millis(5);

const FINGERS: [Finger; 2] = [Finger::Middle, Finger::Index];

/// One expected/unexpected assignment of the second stimulus for a given
/// first stimulus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StimulusPair {
    pub expected: Finger,
    pub unexpected: Finger,
}

/// One stimulus pair presentation.
#[derive(Debug, Clone)]
pub struct PairEvent {
    pub first: Finger,
    pub second: Finger,
    pub expected: bool,
    pub repeated: bool,
    /// Inter-pair interval after this trial, in seconds.
    pub ipi: f64,
}

/// All expected/unexpected assignments for one first stimulus: each
/// distinct ordered pair of second fingers.
pub fn stimulus_pairs() -> Vec<StimulusPair> {
    let mut pairs = Vec::new();
    for expected in FINGERS {
        for unexpected in FINGERS {
            if expected != unexpected {
                pairs.push(StimulusPair {
                    expected,
                    unexpected,
                });
            }
        }
    }
    pairs
}

/// Build the shuffled blocks of pair events.
///
/// Each base block consumes one expected/unexpected assignment per first
/// finger without replacement, fills it with trials at the configured
/// expected/unexpected proportions, and is duplicated `n_repeats_per_block`
/// times with independent shuffles; the blocks are then shuffled globally.
pub fn prep_blocks<R: Rng>(config: &ExpectationConfig, rng: &mut R) -> Vec<Vec<PairEvent>> {
    let mut remaining: HashMap<Finger, Vec<StimulusPair>> = HashMap::new();
    let n_base_blocks = stimulus_pairs().len();

    let mut blocks = Vec::new();

    for _ in 0..n_base_blocks {
        let mut block_events = Vec::new();

        for first in FINGERS {
            let options = remaining.entry(first).or_insert_with(stimulus_pairs);
            if options.is_empty() {
                *options = stimulus_pairs();
            }
            let pick = rng.gen_range(0..options.len());
            let pair = options.swap_remove(pick);

            for (expected, prob) in [(true, config.prop_expected[0]), (false, config.prop_expected[1])]
            {
                let n_trials = (config.n_events_per_block as f64 / 2.0 * prob) as usize;
                let second = if expected { pair.expected } else { pair.unexpected };

                for _ in 0..n_trials {
                    block_events.push(PairEvent {
                        first,
                        second,
                        expected,
                        repeated: first == second,
                        ipi: rng.gen_range(config.ipi_range.0..config.ipi_range.1),
                    });
                }
            }
        }

        for _ in 0..config.n_repeats_per_block {
            let mut shuffled = block_events.clone();
            shuffled.shuffle(rng);
            blocks.push(shuffled);
        }
    }

    blocks.shuffle(rng);
    blocks
}

/// Total duration of a prepared run in seconds: per-trial timing plus block
/// initialisation and break allowances.
pub fn estimate_duration(config: &ExpectationConfig, blocks: &[Vec<PairEvent>]) -> f64 {
    let mut total = 0.0;
    for block in blocks {
        total += config.break_settle_s;
        total += 60.0; // break between blocks
        for event in block {
            total += config.isi + event.ipi + config.max_response_time;
            total += 3.0 * 0.005; // trigger pulses
        }
    }
    total
}

/// The expectation paradigm: pairs of pulses at a fixed ISI where the
/// second stimulus is usually the expected finger, with a forced-choice
/// report of the second stimulation site.
pub struct ExpectationTask {
    config: ExpectationConfig,
    triggers: ExpectationTriggers,
    port: Box<dyn TriggerPort>,
    stimulators: HashMap<Finger, Box<dyn Stimulator>>,
    pad: ResponsePad,
    prompt: Box<dyn OperatorPrompt>,
    send_trigger: bool,
    start_time: Instant,
}

impl ExpectationTask {
    pub fn new(
        config: ExpectationConfig,
        port: Box<dyn TriggerPort>,
        stimulators: HashMap<Finger, Box<dyn Stimulator>>,
        pad: ResponsePad,
        prompt: Box<dyn OperatorPrompt>,
    ) -> Self {
        Self {
            config,
            triggers: ExpectationTriggers,
            port,
            stimulators,
            pad,
            prompt,
            send_trigger: true,
            start_time: Instant::now(),
        }
    }

    pub fn set_send_trigger(&mut self, send: bool) {
        self.send_trigger = send;
    }

    fn elapsed(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    fn pulse_trigger(&mut self, code: u8) -> Result<()> {
        if self.send_trigger {
            raise_and_lower(self.port.as_mut(), code, TRIGGER_WIDTH)?;
        }
        Ok(())
    }

    fn deliver_stimulus(&mut self, site: Finger) -> Result<()> {
        if let Some(stimulator) = self.stimulators.get_mut(&site) {
            stimulator.send_pulse()?;
        }
        Ok(())
    }

    fn initialise_block(&mut self, logger: &mut PairLogger) -> Result<()> {
        self.pulse_trigger(self.triggers.break_start())?;
        logger.log(&PairRow::marker("break_start", self.elapsed()))?;

        self.prompt
            .wait_for_continue("Starting new block. Check in on the participant.");

        self.pulse_trigger(self.triggers.break_end())?;
        logger.log(&PairRow::marker("break_end", self.elapsed()))?;
        thread::sleep(Duration::from_secs_f64(self.config.break_settle_s));
        Ok(())
    }

    pub fn run(&mut self, blocks: &[Vec<PairEvent>], logger: &mut PairLogger) -> Result<()> {
        self.pad.start();

        for (block_idx, block) in blocks.iter().enumerate() {
            self.initialise_block(logger)?;

            for (i, event) in block.iter().enumerate() {
                println!(
                    "{} trial {}/{} in block {}/{}",
                    "expectation".dimmed(),
                    i + 1,
                    block.len(),
                    block_idx + 1,
                    blocks.len()
                );

                let time_first = self.elapsed();
                self.deliver_stimulus(event.first)?;
                self.pulse_trigger(self.triggers.first(event.first))?;

                thread::sleep(Duration::from_secs_f64(self.config.isi));

                let time_second = self.elapsed();
                self.deliver_stimulus(event.second)?;
                self.pulse_trigger(self.triggers.second(
                    event.second,
                    event.expected,
                    event.repeated,
                ))?;

                self.pad.clear();
                let window_end = time_second + self.config.max_response_time;
                let mut response: Option<String> = None;
                let mut rt: Option<f64> = None;
                let mut correct: Option<bool> = None;

                while self.elapsed() < window_end {
                    if let Some(press) = self.pad.take_response() {
                        self.pulse_trigger(self.triggers.response())?;
                        rt = Some(self.elapsed() - time_second);
                        correct = Some(response_matches(&press.label, event.second));
                        println!(
                            "{}",
                            format!(
                                "response {} ({}) rt {:.3}s",
                                press.label,
                                if correct == Some(true) {
                                    "correct"
                                } else {
                                    "incorrect"
                                },
                                rt.unwrap_or_default()
                            )
                            .green()
                        );
                        response = Some(press.label);
                        break;
                    }
                    thread::sleep(RESPONSE_POLL);
                }

                logger.log(&PairRow {
                    block: block_idx.to_string(),
                    stim_site_first: Some(event.first.as_str().to_string()),
                    time_first: Some(time_first),
                    stim_site_second: Some(event.second.as_str().to_string()),
                    time_second: Some(time_second),
                    repeated: Some(event.repeated),
                    expected: Some(event.expected),
                    response,
                    rt,
                    correct,
                })?;

                thread::sleep(Duration::from_secs_f64(event.ipi));
            }
        }

        self.pad.stop();
        println!("{}", "Experiment finished.".green());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::response_pad::{IdleLineReader, ResponsePadConfig};
    use crate::devices::stimulator::{FakeStimulator, IntensityTable};
    use crate::devices::triggers::FakeTriggerPort;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(11)
    }

    #[test]
    fn each_first_finger_has_both_assignments() {
        let pairs = stimulus_pairs();
        assert_eq!(pairs.len(), 2);
        assert!(pairs.iter().all(|p| p.expected != p.unexpected));
    }

    #[test]
    fn blocks_follow_the_configured_proportions() {
        let config = ExpectationConfig::default();
        let blocks = prep_blocks(&config, &mut rng());

        // 2 base blocks x 2 repeats.
        assert_eq!(blocks.len(), 4);

        for block in &blocks {
            let expected = block.iter().filter(|e| e.expected).count();
            let unexpected = block.iter().filter(|e| !e.expected).count();
            // Per first finger: 50 * 0.75 expected, 50 * 0.25 unexpected.
            assert_eq!(expected, 2 * 37);
            assert_eq!(unexpected, 2 * 12);
        }
    }

    #[test]
    fn repeated_flag_reflects_same_site() {
        let config = ExpectationConfig::default();
        for block in prep_blocks(&config, &mut rng()) {
            for event in block {
                assert_eq!(event.repeated, event.first == event.second);
            }
        }
    }

    #[test]
    fn ipi_stays_in_configured_range() {
        let config = ExpectationConfig::default();
        for block in prep_blocks(&config, &mut rng()) {
            for event in block {
                assert!(event.ipi >= config.ipi_range.0 && event.ipi < config.ipi_range.1);
            }
        }
    }

    #[test]
    fn duration_counts_trials_and_breaks() {
        let config = ExpectationConfig::default();
        let blocks = vec![vec![PairEvent {
            first: Finger::Middle,
            second: Finger::Middle,
            expected: true,
            repeated: true,
            ipi: 1.2,
        }]];
        let total = estimate_duration(&config, &blocks);
        let per_trial = config.isi + 1.2 + config.max_response_time + 0.015;
        assert!((total - (62.0 + per_trial)).abs() < 1e-9);
    }

    struct SilentPrompt;
    impl OperatorPrompt for SilentPrompt {
        fn wait_for_continue(&mut self, _message: &str) {}
    }

    fn build_task(config: ExpectationConfig) -> ExpectationTask {
        let mut stimulators: HashMap<Finger, Box<dyn Stimulator>> = HashMap::new();
        for finger in FINGERS {
            stimulators.insert(
                finger,
                Box::new(FakeStimulator::silent(
                    finger.as_str(),
                    IntensityTable::standard_grid(),
                    4.0,
                )),
            );
        }
        let pad = ResponsePad::new(
            ResponsePadConfig::default(),
            Box::new(IdleLineReader::new(4)),
        );

        let mut task = ExpectationTask::new(
            config,
            Box::new(FakeTriggerPort::new("test")),
            stimulators,
            pad,
            Box::new(SilentPrompt),
        );
        task.set_send_trigger(false);
        task
    }

    fn temp_logger(name: &str) -> PairLogger {
        let dir = std::env::temp_dir().join("tactile_rig_expectation_tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        PairLogger::create(&path).unwrap()
    }

    #[test]
    fn run_logs_one_row_per_trial_plus_block_markers() {
        let mut config = ExpectationConfig::default();
        config.isi = 0.01;
        config.max_response_time = 0.02;
        config.ipi_range = (0.001, 0.002);
        config.break_settle_s = 0.0;
        let mut task = build_task(config);

        let dir = std::env::temp_dir().join("tactile_rig_expectation_tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("pairs.csv");
        let _ = std::fs::remove_file(&path);
        let mut logger = PairLogger::create(&path).unwrap();

        let blocks = vec![vec![
            PairEvent {
                first: Finger::Middle,
                second: Finger::Index,
                expected: true,
                repeated: false,
                ipi: 0.001,
            },
            PairEvent {
                first: Finger::Index,
                second: Finger::Index,
                expected: false,
                repeated: true,
                ipi: 0.001,
            },
        ]];
        task.run(&blocks, &mut logger).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        // header + break_start + break_end + 2 trials
        assert_eq!(contents.lines().count(), 5);
        assert!(contents.contains("break_start"));
        assert!(contents.contains("middle"));
    }

    #[test]
    fn settle_after_break_follows_configured_duration() {
        // The rig defaults to the same 2 s pause as the discrimination task.
        assert!((ExpectationConfig::default().break_settle_s - 2.0).abs() < 1e-9);

        let mut config = ExpectationConfig::default();
        config.break_settle_s = 0.08;
        let mut task = build_task(config);
        let mut logger = temp_logger("settle.csv");

        let started = Instant::now();
        task.run(&[Vec::new()], &mut logger).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(80));
    }
}
