use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::Result;

/// Reads the momentary state of the pad's digital input lines.
/// The DAQ-backed reader lives outside this crate; tests and dry runs use
/// scripted or idle readers.
pub trait LineReader: Send {
    fn read_lines(&mut self) -> Result<Vec<bool>>;
}

/// A reader whose lines are never high. Lets the rig run without a pad.
pub struct IdleLineReader {
    num_lines: usize,
}

impl IdleLineReader {
    pub fn new(num_lines: usize) -> Self {
        Self { num_lines }
    }
}

impl LineReader for IdleLineReader {
    fn read_lines(&mut self) -> Result<Vec<bool>> {
        Ok(vec![false; self.num_lines])
    }
}

#[derive(Debug, Clone)]
pub struct ResponsePadConfig {
    pub device: String,
    pub port: String,
    pub num_lines: usize,
    pub poll_interval: Duration,
    pub debounce: Duration,
    /// Line index to button label.
    pub mapping: HashMap<usize, String>,
}

impl Default for ResponsePadConfig {
    fn default() -> Self {
        let mut mapping = HashMap::new();
        mapping.insert(0, "b".to_string()); // right key
        mapping.insert(1, "y".to_string()); // left key
        Self {
            device: "Dev1".to_string(),
            port: "port6".to_string(),
            num_lines: 4,
            poll_interval: Duration::from_micros(500),
            debounce: Duration::from_millis(50),
            mapping,
        }
    }
}

/// A button press as seen by the polling thread.
#[derive(Debug, Clone)]
pub struct Press {
    pub label: String,
    pub at: Instant,
}

/// Button pad listener: a background thread polls the input lines,
/// debounces each line, and keeps the latest press until the experiment
/// loop consumes it.
pub struct ResponsePad {
    config: ResponsePadConfig,
    reader: Arc<Mutex<Box<dyn LineReader>>>,
    active: Arc<AtomicBool>,
    last_press: Arc<Mutex<Option<Press>>>,
    handle: Option<JoinHandle<()>>,
}

impl ResponsePad {
    pub fn new(config: ResponsePadConfig, reader: Box<dyn LineReader>) -> Self {
        Self {
            config,
            reader: Arc::new(Mutex::new(reader)),
            active: Arc::new(AtomicBool::new(false)),
            last_press: Arc::new(Mutex::new(None)),
            handle: None,
        }
    }

    pub fn channel(&self) -> String {
        format!(
            "{}/{}/line0:{}",
            self.config.device,
            self.config.port,
            self.config.num_lines - 1
        )
    }

    /// Start the polling thread. Idempotent.
    pub fn start(&mut self) {
        if self.active.swap(true, Ordering::SeqCst) {
            return;
        }

        let reader = Arc::clone(&self.reader);
        let active = Arc::clone(&self.active);
        let last_press = Arc::clone(&self.last_press);
        let config = self.config.clone();

        self.handle = Some(thread::spawn(move || {
            let mut last_line_press: Vec<Option<Instant>> = vec![None; config.num_lines];

            while active.load(Ordering::SeqCst) {
                let lines = match reader.lock().unwrap().read_lines() {
                    Ok(lines) => lines,
                    Err(e) => {
                        eprintln!("response pad read failed: {}", e);
                        break;
                    }
                };
                if lines.len() != config.num_lines {
                    eprintln!(
                        "response pad returned {} lines, expected {}",
                        lines.len(),
                        config.num_lines
                    );
                    break;
                }

                let now = Instant::now();
                for (idx, pressed) in lines.iter().enumerate() {
                    let debounced = last_line_press[idx]
                        .map_or(true, |t| now.duration_since(t) >= config.debounce);
                    if *pressed && debounced {
                        let label = config
                            .mapping
                            .get(&idx)
                            .cloned()
                            .unwrap_or_else(|| idx.to_string());
                        *last_press.lock().unwrap() = Some(Press { label, at: now });
                        last_line_press[idx] = Some(now);
                        break;
                    }
                }

                thread::sleep(config.poll_interval);
            }
        }));
    }

    /// Consume the latest press, if any.
    pub fn take_response(&self) -> Option<Press> {
        self.last_press.lock().unwrap().take()
    }

    /// Drop any press registered before a response window opens.
    pub fn clear(&self) {
        *self.last_press.lock().unwrap() = None;
    }

    /// Stop the polling thread and join it. Idempotent.
    pub fn stop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ResponsePad {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Replays a fixed script of line states, then goes idle.
    struct ScriptedLineReader {
        frames: Vec<Vec<bool>>,
        cursor: usize,
        num_lines: usize,
    }

    impl ScriptedLineReader {
        fn new(frames: Vec<Vec<bool>>, num_lines: usize) -> Self {
            Self {
                frames,
                cursor: 0,
                num_lines,
            }
        }
    }

    impl LineReader for ScriptedLineReader {
        fn read_lines(&mut self) -> Result<Vec<bool>> {
            let frame = self
                .frames
                .get(self.cursor)
                .cloned()
                .unwrap_or_else(|| vec![false; self.num_lines]);
            self.cursor += 1;
            Ok(frame)
        }
    }

    fn pad_with(frames: Vec<Vec<bool>>, debounce: Duration) -> ResponsePad {
        let mut config = ResponsePadConfig::default();
        config.poll_interval = Duration::from_micros(200);
        config.debounce = debounce;
        let reader = ScriptedLineReader::new(frames, config.num_lines);
        ResponsePad::new(config, Box::new(reader))
    }

    fn wait_for_press(pad: &ResponsePad) -> Option<Press> {
        let deadline = Instant::now() + Duration::from_millis(500);
        while Instant::now() < deadline {
            if let Some(press) = pad.take_response() {
                return Some(press);
            }
            thread::sleep(Duration::from_millis(1));
        }
        None
    }

    #[test]
    fn press_is_mapped_to_its_label() {
        let mut pad = pad_with(vec![vec![false, true, false, false]], Duration::from_millis(1));
        pad.start();
        let press = wait_for_press(&pad).expect("press not seen");
        assert_eq!(press.label, "y");
        pad.stop();
    }

    #[test]
    fn held_button_is_debounced() {
        // The same line high on every poll; with a long debounce only the
        // first edge may register.
        let frames = vec![vec![true, false, false, false]; 50];
        let mut pad = pad_with(frames, Duration::from_secs(5));
        pad.start();
        let first = wait_for_press(&pad).expect("first press not seen");
        assert_eq!(first.label, "b");
        thread::sleep(Duration::from_millis(50));
        assert!(pad.take_response().is_none());
        pad.stop();
    }

    #[test]
    fn take_response_consumes_the_press() {
        let mut pad = pad_with(vec![vec![false, true, false, false]], Duration::from_millis(1));
        pad.start();
        assert!(wait_for_press(&pad).is_some());
        assert!(pad.take_response().is_none());
        pad.stop();
    }

    #[test]
    fn stop_is_idempotent_and_joins() {
        let mut pad = pad_with(Vec::new(), Duration::from_millis(1));
        pad.start();
        pad.stop();
        pad.stop();
    }

    #[test]
    fn unmapped_line_falls_back_to_its_index() {
        let mut pad = pad_with(vec![vec![false, false, true, false]], Duration::from_millis(1));
        pad.start();
        let press = wait_for_press(&pad).expect("press not seen");
        assert_eq!(press.label, "2");
        pad.stop();
    }
}
