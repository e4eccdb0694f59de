use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{Result, RigError};
use crate::paradigm::Finger;

/// How many salient rhythm-establishing pulses precede each weak target.
pub const SALIENT_PER_SEQUENCE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Salient,
    Target(Finger),
}

impl EventKind {
    pub fn label(&self) -> String {
        match self {
            EventKind::Salient => "stim/salient".to_string(),
            EventKind::Target(finger) => format!("target/{}", finger.as_str()),
        }
    }

    pub fn target_finger(&self) -> Option<Finger> {
        match self {
            EventKind::Salient => None,
            EventKind::Target(finger) => Some(*finger),
        }
    }
}

/// One timed stimulus slot within a block.
#[derive(Debug, Clone)]
pub struct Event {
    pub isi: f64,
    pub kind: EventKind,
    pub n_in_block: usize,
    pub block: usize,
    /// The staircase is re-seeded right after this stimulus is delivered.
    pub reset_quest: bool,
}

/// An entry of the experiment-level order: a stimulation block defined by
/// its ISI index, or a participant break.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockEntry {
    Isi(usize),
    Break,
}

/// A fully expanded run: trials interleaved with break markers.
#[derive(Debug, Clone)]
pub enum ScheduleEntry {
    Trial(Event),
    Break,
}

/// Generate the events of one block: `n_sequences` repetitions of three
/// salient pulses followed by one weak target on a randomly drawn finger.
///
/// `reset_after` plants a staircase reset marker on the first salient
/// stimulus of that sequence.
pub fn event_sequence<R: Rng>(
    n_sequences: usize,
    isi: f64,
    block: usize,
    prop_targets: [f64; 2],
    reset_after: Option<usize>,
    rng: &mut R,
) -> Vec<Event> {
    let mut events = Vec::with_capacity(n_sequences * (SALIENT_PER_SEQUENCE + 1));
    let mut n_in_block = 0;

    for seq in 0..n_sequences {
        let mut reset = reset_after == Some(seq);

        for _ in 0..SALIENT_PER_SEQUENCE {
            n_in_block += 1;
            events.push(Event {
                isi,
                kind: EventKind::Salient,
                n_in_block,
                block,
                reset_quest: reset,
            });
            reset = false;
        }

        n_in_block += 1;
        let finger = if rng.gen_bool(prop_targets[0].clamp(0.0, 1.0)) {
            Finger::Middle
        } else {
            Finger::Index
        };
        events.push(Event {
            isi,
            kind: EventKind::Target(finger),
            n_in_block,
            block,
            reset_quest: false,
        });
    }

    events
}

/// Expand a block order into the full trial schedule.
///
/// Blocks count against `reset_quest` by their position in `order`
/// (breaks included), matching the cadence the recording is aligned to;
/// the logged block id only advances on stimulation blocks.
pub fn build_schedule<R: Rng>(
    order: &[BlockEntry],
    isis: &[f64],
    n_sequences: usize,
    prop_targets: [f64; 2],
    reset_quest: Option<usize>,
    rng: &mut R,
) -> Vec<ScheduleEntry> {
    let mut schedule = Vec::new();
    let mut logged_block = 0;

    for (block_idx, entry) in order.iter().enumerate() {
        match entry {
            BlockEntry::Break => schedule.push(ScheduleEntry::Break),
            BlockEntry::Isi(isi_idx) => {
                let reset_after = match reset_quest {
                    Some(every) if every > 0 && block_idx != 0 && block_idx % every == 0 => {
                        // Roughly halfway through the block.
                        Some(n_sequences / 2)
                    }
                    _ => None,
                };
                let events = event_sequence(
                    n_sequences,
                    isis[*isi_idx],
                    logged_block,
                    prop_targets,
                    reset_after,
                    rng,
                );
                schedule.extend(events.into_iter().map(ScheduleEntry::Trial));
                logged_block += 1;
            }
        }
    }

    schedule
}

/// Build a block order that realises each wanted transition exactly once.
///
/// Randomized backtracking over the transition multiset; fails only when the
/// multiset admits no Eulerian-style path from the allowed start blocks.
pub fn build_block_order<R: Rng>(
    wanted_transitions: &[(usize, usize)],
    start_blocks: Option<&[usize]>,
    rng: &mut R,
) -> Result<Vec<usize>> {
    let mut block_types: Vec<usize> = wanted_transitions
        .iter()
        .flat_map(|&(a, b)| [a, b])
        .collect();
    block_types.sort_unstable();
    block_types.dedup();

    let mut remaining: HashMap<(usize, usize), usize> = HashMap::new();
    for &pair in wanted_transitions {
        *remaining.entry(pair).or_insert(0) += 1;
    }

    let mut starts: Vec<usize> = match start_blocks {
        Some(blocks) => blocks
            .iter()
            .copied()
            .filter(|b| block_types.contains(b))
            .collect(),
        None => block_types.clone(),
    };
    starts.shuffle(rng);

    for start in starts {
        let mut path = vec![start];
        if backtrack(&mut path, &mut remaining, &block_types, rng) {
            return Ok(path);
        }
    }

    Err(RigError::Scheduling(
        "no block order realises the wanted transitions".to_string(),
    ))
}

fn backtrack<R: Rng>(
    path: &mut Vec<usize>,
    remaining: &mut HashMap<(usize, usize), usize>,
    block_types: &[usize],
    rng: &mut R,
) -> bool {
    if remaining.values().sum::<usize>() == 0 {
        return true;
    }

    let last = *path.last().unwrap();
    let mut options: Vec<usize> = block_types.to_vec();
    options.shuffle(rng);

    for next in options {
        if next == last {
            continue;
        }
        let candidate = (last, next);
        if remaining.get(&candidate).copied().unwrap_or(0) > 0 {
            *remaining.get_mut(&candidate).unwrap() -= 1;
            path.push(next);
            if backtrack(path, remaining, block_types, rng) {
                return true;
            }
            path.pop();
            *remaining.get_mut(&candidate).unwrap() += 1;
        }
    }

    false
}

/// Generate the experiment-level order: `n_repeats` transition-complete
/// segments separated by breaks, each starting from a block type drawn
/// without replacement.
pub fn generate_block_order<R: Rng>(
    n_isis: usize,
    n_repeats: usize,
    rng: &mut R,
) -> Result<Vec<BlockEntry>> {
    let block_types: Vec<usize> = (0..n_isis).collect();
    let wanted: Vec<(usize, usize)> = block_types
        .iter()
        .flat_map(|&a| block_types.iter().map(move |&b| (a, b)))
        .filter(|&(a, b)| a != b)
        .collect();

    let mut order = Vec::new();
    let mut available_starts: Vec<usize> = Vec::new();

    for repeat in 0..n_repeats {
        if available_starts.is_empty() {
            available_starts = block_types.clone();
        }
        let pick = rng.gen_range(0..available_starts.len());
        let start = available_starts.swap_remove(pick);

        // A one-ISI design has no transitions; each segment is one block.
        let segment = if wanted.is_empty() {
            vec![start]
        } else {
            build_block_order(&wanted, Some(&[start]), rng)?
        };
        order.extend(segment.into_iter().map(BlockEntry::Isi));
        if repeat != n_repeats - 1 {
            order.push(BlockEntry::Break);
        }
    }

    Ok(order)
}

/// Estimate the total duration of a run in seconds.
pub fn estimate_duration(
    order: &[BlockEntry],
    isis: &[f64],
    n_sequences: usize,
    break_duration: f64,
) -> f64 {
    let events_per_block = (SALIENT_PER_SEQUENCE + 1) * n_sequences;
    order
        .iter()
        .map(|entry| match entry {
            BlockEntry::Break => break_duration,
            BlockEntry::Isi(idx) => events_per_block as f64 * isis[*idx],
        })
        .sum()
}
