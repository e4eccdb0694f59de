use super::quest::{QuestHandler, QuestSettings};

/// Rounds an intensity to the 0.1 steps the stimulators accept.
pub fn round_intensity(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Wraps the QUEST estimator with device-safe output handling.
///
/// The controller owns the reset policy: a reset re-seeds a fresh handler
/// whose prior is centered on the running estimate, so the posterior can
/// re-widen without losing the level the participant had converged to.
pub struct QuestController {
    settings: QuestSettings,
    handler: QuestHandler,
    max_weak: f64,
    current_intensity: f64,
    n_resets: usize,
}

impl QuestController {
    pub fn new(start_val: f64, max_weak: f64, mut settings: QuestSettings) -> Self {
        settings.start_val = start_val;
        settings.max_val = max_weak;
        let handler = QuestHandler::new(settings.clone());
        Self {
            settings,
            handler,
            max_weak,
            current_intensity: round_intensity(start_val),
            n_resets: 0,
        }
    }

    /// Tighten the ceiling for the weak intensity mid-run.
    pub fn update_max_weak(&mut self, new_max: f64) {
        self.max_weak = new_max;
        self.settings.max_val = new_max;
    }

    /// Next intensity to present, clamped to the device-safe range and
    /// rounded to the stimulator's 0.1 resolution.
    pub fn next_intensity(&mut self) -> f64 {
        let proposed = self.handler.next();
        let clamped = proposed.max(self.settings.min_val).min(self.max_weak);
        self.current_intensity = round_intensity(clamped);
        self.current_intensity
    }

    pub fn add_response(&mut self, correct: bool, intensity: f64) {
        self.handler.add_response(correct, intensity);
    }

    /// Re-seed the estimator, carrying the posterior mean over as the new
    /// prior center.
    pub fn reset(&mut self) {
        self.settings.start_val = self.handler.mean().min(self.max_weak);
        self.handler = QuestHandler::new(self.settings.clone());
        self.n_resets += 1;
    }

    pub fn current_intensity(&self) -> f64 {
        self.current_intensity
    }

    pub fn mean(&self) -> f64 {
        self.handler.mean()
    }

    pub fn n_resets(&self) -> usize {
        self.n_resets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> QuestController {
        QuestController::new(2.0, 5.5, QuestSettings::default())
    }

    #[test]
    fn intensity_is_rounded_to_tenths() {
        let mut quest = controller();
        let intensity = quest.next_intensity();
        assert!((intensity * 10.0 - (intensity * 10.0).round()).abs() < 1e-9);
    }

    #[test]
    fn intensity_never_exceeds_max_weak() {
        let mut quest = controller();
        for _ in 0..50 {
            let intensity = quest.next_intensity();
            quest.add_response(false, intensity);
        }
        assert!(quest.next_intensity() <= 5.5);
    }

    #[test]
    fn intensity_never_drops_below_floor() {
        let mut quest = controller();
        for _ in 0..50 {
            let intensity = quest.next_intensity();
            quest.add_response(true, intensity);
        }
        assert!(quest.next_intensity() >= 1.0);
    }

    #[test]
    fn reset_carries_estimate_forward() {
        let mut quest = controller();
        // Outcomes consistent with a threshold near the middle of the grid.
        for i in 0..40 {
            quest.add_response(i % 4 != 0, 3.0);
        }
        let converged = quest.mean();
        quest.reset();
        assert_eq!(quest.n_resets(), 1);
        // Fresh prior centered on the old estimate.
        assert!((quest.mean() - converged).abs() < 0.5);
    }

    #[test]
    fn lowered_ceiling_clamps_next_intensity() {
        let mut quest = controller();
        for _ in 0..30 {
            let intensity = quest.next_intensity();
            quest.add_response(false, intensity);
        }
        quest.update_max_weak(2.0);
        assert!(quest.next_intensity() <= 2.0);
    }
}
