pub mod discrimination;
pub mod events;
pub mod expectation;

use serde::{Deserialize, Serialize};

/// Stimulated finger. The rig drives one stimulator per finger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Finger {
    Middle,
    Index,
}

impl Finger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Finger::Middle => "middle",
            Finger::Index => "index",
        }
    }
}

/// Maps a button label from the response pad to the finger it reports.
///
/// The pad exposes two buttons: `y`/`2` for the middle finger and `b`/`1`
/// for the index finger.
pub fn response_matches(label: &str, target: Finger) -> bool {
    match target {
        Finger::Middle => matches!(label, "y" | "2"),
        Finger::Index => matches!(label, "b" | "1"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_labels_map_to_fingers() {
        assert!(response_matches("y", Finger::Middle));
        assert!(response_matches("2", Finger::Middle));
        assert!(response_matches("b", Finger::Index));
        assert!(response_matches("1", Finger::Index));
        assert!(!response_matches("y", Finger::Index));
        assert!(!response_matches("b", Finger::Middle));
    }
}
