use std::collections::HashMap;
use std::io::BufRead;
use std::thread;
use std::time::{Duration, Instant};

use colored::Colorize;
use rand::Rng;

use crate::config::{ExperimentConfig, QuestConfig};
use crate::devices::response_pad::ResponsePad;
use crate::devices::triggers::{raise_and_lower, TriggerMap, TriggerPort};
use crate::devices::Stimulator;
use crate::error::Result;
use crate::paradigm::events::{event_sequence, Event, EventKind, ScheduleEntry};
use crate::paradigm::{response_matches, Finger};
use crate::staircase::QuestController;
use crate::utils::log::{TrialLogger, TrialRow};

/// Blocks the run until the operator confirms. Stdin in the lab; scripted
/// in tests.
pub trait OperatorPrompt: Send {
    fn wait_for_continue(&mut self, message: &str);
}

pub struct StdinPrompt;

impl OperatorPrompt for StdinPrompt {
    fn wait_for_continue(&mut self, message: &str) {
        println!("{}", format!("{} Press Enter to continue...", message).cyan());
        let mut line = String::new();
        let _ = std::io::stdin().lock().read_line(&mut line);
    }
}

const RESPONSE_POLL: Duration = Duration::from_micros(500);

/// The two-finger tactile discrimination task: rhythm-establishing salient
/// pulses to both fingers, weak staircase-controlled targets to one, with
/// responses collected inside the inter-stimulus window.
pub struct DiscriminationTask {
    config: ExperimentConfig,
    triggers: TriggerMap,
    port: Box<dyn TriggerPort>,
    stimulators: HashMap<Finger, Box<dyn Stimulator>>,
    pad: ResponsePad,
    prompt: Box<dyn OperatorPrompt>,
    quest: QuestController,
    salient_intensity: f64,
    weak_intensity: f64,
    send_trigger: bool,
    start_time: Instant,
}

impl DiscriminationTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ExperimentConfig,
        quest_config: &QuestConfig,
        triggers: TriggerMap,
        port: Box<dyn TriggerPort>,
        mut stimulators: HashMap<Finger, Box<dyn Stimulator>>,
        pad: ResponsePad,
        prompt: Box<dyn OperatorPrompt>,
        salient_intensity: f64,
        weak_start: f64,
    ) -> Result<Self> {
        let max_weak = salient_intensity - config.weak_ceiling_gap;
        let mut quest =
            QuestController::new(weak_start, max_weak, quest_config.settings(weak_start, max_weak));
        let weak_intensity = quest.next_intensity();

        for stimulator in stimulators.values_mut() {
            stimulator.set_pulse_duration(config.stim_duration_us)?;
            stimulator.change_intensity(salient_intensity)?;
        }

        Ok(Self {
            config,
            triggers,
            port,
            stimulators,
            pad,
            prompt,
            quest,
            salient_intensity,
            weak_intensity,
            send_trigger: false,
            start_time: Instant::now(),
        })
    }

    /// Arm or disarm the recording triggers. Practice runs are unarmed.
    pub fn set_send_trigger(&mut self, send: bool) {
        self.send_trigger = send;
    }

    pub fn weak_intensity(&self) -> f64 {
        self.weak_intensity
    }

    pub fn quest(&self) -> &QuestController {
        &self.quest
    }

    fn elapsed(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    fn trigger_width(&self) -> Duration {
        Duration::from_secs_f64(self.config.trigger_pulse_ms / 1000.0)
    }

    fn pulse_trigger(&mut self, code: u8) -> Result<()> {
        let width = self.trigger_width();
        raise_and_lower(self.port.as_mut(), code, width)
    }

    /// Raise the new salient intensity mid-session (after practice) and
    /// tighten the staircase ceiling accordingly.
    pub fn set_salient_intensity(&mut self, intensity: f64) -> Result<()> {
        for stimulator in self.stimulators.values_mut() {
            stimulator.change_intensity(intensity)?;
        }
        self.salient_intensity = intensity;
        self.quest
            .update_max_weak(intensity - self.config.weak_ceiling_gap);
        Ok(())
    }

    fn deliver_stimulus(&mut self, kind: &EventKind) -> Result<()> {
        match kind {
            EventKind::Salient => {
                for stimulator in self.stimulators.values_mut() {
                    stimulator.send_pulse()?;
                }
            }
            EventKind::Target(finger) => {
                if let Some(stimulator) = self.stimulators.get_mut(finger) {
                    stimulator.send_pulse()?;
                }
            }
        }
        Ok(())
    }

    /// Stage connector intensities for the upcoming event: a finger that
    /// just delivered a weak target goes back to salient, and the finger of
    /// an upcoming target is pre-set to the current weak level.
    fn prepare_for_next_stimulus(
        &mut self,
        kind: &EventKind,
        next_kind: Option<EventKind>,
    ) -> Result<()> {
        if let EventKind::Target(finger) = kind {
            if let Some(stimulator) = self.stimulators.get_mut(finger) {
                stimulator.change_intensity(self.salient_intensity)?;
            }
        }
        if let Some(EventKind::Target(finger)) = next_kind {
            if let Some(stimulator) = self.stimulators.get_mut(&finger) {
                stimulator.change_intensity(self.weak_intensity)?;
            }
        }
        Ok(())
    }

    fn reset_quest(&mut self) {
        self.quest.reset();
        self.weak_intensity = self.quest.next_intensity();
        println!(
            "{}",
            format!(
                "QUEST reset #{}, weak intensity {:.1}",
                self.quest.n_resets(),
                self.weak_intensity
            )
            .cyan()
        );
    }

    fn log(logger: &mut Option<&mut TrialLogger>, row: TrialRow) -> Result<()> {
        if let Some(logger) = logger.as_mut() {
            logger.log(&row)?;
        }
        Ok(())
    }

    /// Break point: frame it with trigger codes, wait for the operator,
    /// then give the participant a moment to settle.
    pub fn check_in_on_participant(
        &mut self,
        message: &str,
        mut logger: Option<&mut TrialLogger>,
    ) -> Result<()> {
        if self.send_trigger {
            let code = self.triggers.break_start;
            self.pulse_trigger(code)?;
            Self::log(
                &mut logger,
                TrialRow::marker(self.elapsed(), "break", "break", code),
            )?;
        }

        self.prompt.wait_for_continue(message);

        if self.send_trigger {
            let code = self.triggers.break_end;
            self.pulse_trigger(code)?;
            Self::log(
                &mut logger,
                TrialRow::marker(self.elapsed(), "break", "break/end", code),
            )?;
        }

        thread::sleep(Duration::from_secs_f64(self.config.break_settle_s));
        Ok(())
    }

    /// Run the full schedule, framed by experiment start/end markers.
    pub fn run(&mut self, schedule: &[ScheduleEntry], logger: &mut TrialLogger) -> Result<()> {
        self.pad.start();

        if self.send_trigger {
            let code = self.triggers.experiment_start;
            self.pulse_trigger(code)?;
        }
        logger.log(&TrialRow::marker(
            self.elapsed(),
            "NA",
            "experiment/start",
            self.triggers.experiment_start,
        ))?;

        self.loop_over_events(schedule, Some(logger))?;

        if self.send_trigger {
            let code = self.triggers.experiment_end;
            self.pulse_trigger(code)?;
        }
        logger.log(&TrialRow::marker(
            self.elapsed(),
            "NA",
            "experiment/end",
            self.triggers.experiment_end,
        ))?;

        self.pad.stop();
        Ok(())
    }

    /// A practice block: same loop, nothing logged, triggers unarmed.
    pub fn trial_block(&mut self, isi: f64, n_sequences: usize) -> Result<()> {
        let events = event_sequence(
            n_sequences,
            isi,
            0,
            self.config.prop_targets,
            None,
            &mut rand::thread_rng(),
        );
        let schedule: Vec<ScheduleEntry> = events.into_iter().map(ScheduleEntry::Trial).collect();
        self.pad.start();
        self.loop_over_events(&schedule, None)?;
        self.pad.stop();
        Ok(())
    }

    pub fn loop_over_events(
        &mut self,
        schedule: &[ScheduleEntry],
        mut logger: Option<&mut TrialLogger>,
    ) -> Result<()> {
        let total_breaks = schedule
            .iter()
            .filter(|e| matches!(e, ScheduleEntry::Break))
            .count();
        let mut breaks_done = 0;

        for (i, entry) in schedule.iter().enumerate() {
            let event = match entry {
                ScheduleEntry::Break => {
                    self.check_in_on_participant(
                        "Check in on the participant.",
                        logger.as_deref_mut(),
                    )?;
                    breaks_done += 1;
                    continue;
                }
                ScheduleEntry::Trial(event) => event.clone(),
            };

            let trigger = self.triggers.event(&event.kind);
            let intensity = match event.kind {
                EventKind::Salient => self.salient_intensity,
                EventKind::Target(_) => self.weak_intensity,
            };

            if self.send_trigger {
                self.pulse_trigger(trigger)?;
            }
            self.deliver_stimulus(&event.kind)?;
            let stim_time = self.elapsed();

            Self::log(
                &mut logger,
                TrialRow {
                    time: stim_time,
                    block: event.block.to_string(),
                    isi: Some(event.isi),
                    intensity: Some(intensity),
                    event_type: event.kind.label(),
                    trigger: Some(trigger),
                    n_in_block: Some(event.n_in_block),
                    correct: None,
                    quest_reset: event.reset_quest,
                    rt: None,
                },
            )?;

            println!(
                "{} {}/{} (breaks {}/{}): {} at {:.1}",
                "event".dimmed(),
                i + 1,
                schedule.len(),
                breaks_done,
                total_breaks,
                event.kind.label(),
                intensity
            );

            let target_finger = event.kind.target_finger();
            if target_finger.is_some() {
                // Drop presses from before the window opened.
                self.pad.clear();
            }

            let next_kind = schedule[i + 1..].iter().find_map(|e| match e {
                ScheduleEntry::Trial(next) => Some(next.kind),
                ScheduleEntry::Break => None,
            });
            self.prepare_for_next_stimulus(&event.kind, next_kind)?;

            if event.reset_quest {
                self.reset_quest();
            }

            let window_end = stim_time + event.isi;
            let mut response_given = false;

            while self.elapsed() < window_end {
                if let Some(finger) = target_finger {
                    if !response_given {
                        if let Some(press) = self.pad.take_response() {
                            let correct = response_matches(&press.label, finger);
                            let response_trigger = self.triggers.response(finger, correct);
                            let time_of_response = self.elapsed();

                            if self.send_trigger {
                                self.pulse_trigger(response_trigger)?;
                            }

                            let rt = time_of_response - stim_time;
                            println!(
                                "{}",
                                format!(
                                    "response {} ({}) rt {:.3}s",
                                    press.label,
                                    if correct { "correct" } else { "incorrect" },
                                    rt
                                )
                                .green()
                            );

                            Self::log(
                                &mut logger,
                                TrialRow {
                                    time: time_of_response,
                                    block: event.block.to_string(),
                                    isi: Some(event.isi),
                                    intensity: None,
                                    event_type: "response".to_string(),
                                    trigger: Some(response_trigger),
                                    n_in_block: Some(event.n_in_block),
                                    correct: Some(correct),
                                    quest_reset: false,
                                    rt: Some(rt),
                                },
                            )?;

                            self.quest.add_response(correct, intensity);
                            self.weak_intensity = self.quest.next_intensity();
                            response_given = true;
                        }
                    }
                }
                thread::sleep(RESPONSE_POLL);
            }

            if target_finger.is_some() && !response_given {
                println!("{}", "no response given".yellow());
                // Feed a coin flip so the staircase still advances.
                let guessed = rand::thread_rng().gen_bool(0.5);
                self.quest.add_response(guessed, intensity);
                self.weak_intensity = self.quest.next_intensity();
            }
        }

        Ok(())
    }
}
