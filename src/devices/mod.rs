pub mod response_pad;
pub mod stimulator;
pub mod triggers;

pub use response_pad::{LineReader, ResponsePad, ResponsePadConfig};
pub use stimulator::{FakeStimulator, IntensityTable, Stimulator};
pub use triggers::{FakeTriggerPort, TriggerMap, TriggerPort};
