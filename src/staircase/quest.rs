use serde::{Deserialize, Serialize};

/// Parameters of the QUEST procedure (Watson & Pelli).
///
/// Intensities are on the linear device scale (1.0..=10.0 in practice).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QuestSettings {
    pub start_val: f64,
    pub start_val_sd: f64,
    pub min_val: f64,
    pub max_val: f64,
    /// Target proportion correct that the procedure converges on.
    pub p_threshold: f64,
    /// Slope of the Weibull psychometric function.
    pub beta: f64,
    /// Guess rate. 0.5 for a two-alternative forced choice task.
    pub gamma: f64,
    /// Lapse rate.
    pub delta: f64,
    /// Step of the candidate threshold grid.
    pub grain: f64,
}

impl Default for QuestSettings {
    fn default() -> Self {
        Self {
            start_val: 2.0,
            start_val_sd: 1.0,
            min_val: 1.0,
            max_val: 5.5,
            p_threshold: 0.75,
            beta: 3.5,
            gamma: 0.5,
            delta: 0.01,
            grain: 0.1,
        }
    }
}

/// Bayesian sequential estimator of a perceptual threshold.
///
/// Maintains a log-posterior over a grid of candidate thresholds. Each
/// binary correct/incorrect observation at a known intensity multiplies the
/// posterior by the Weibull likelihood of that outcome.
pub struct QuestHandler {
    settings: QuestSettings,
    thresholds: Vec<f64>,
    log_posterior: Vec<f64>,
    epsilon: f64,
    n_trials: usize,
}

impl QuestHandler {
    pub fn new(settings: QuestSettings) -> Self {
        let mut thresholds = Vec::new();
        let mut t = settings.min_val;
        while t <= settings.max_val + settings.grain / 2.0 {
            thresholds.push(t);
            t += settings.grain;
        }

        // Gaussian prior centered on the starting estimate.
        let log_posterior = thresholds
            .iter()
            .map(|&t| {
                let z = (t - settings.start_val) / settings.start_val_sd;
                -0.5 * z * z
            })
            .collect();

        let epsilon = threshold_offset(
            settings.p_threshold,
            settings.beta,
            settings.gamma,
            settings.delta,
        );

        Self {
            settings,
            thresholds,
            log_posterior,
            epsilon,
            n_trials: 0,
        }
    }

    pub fn settings(&self) -> &QuestSettings {
        &self.settings
    }

    pub fn n_trials(&self) -> usize {
        self.n_trials
    }

    /// Probability of a correct response at `intensity` given threshold `t`.
    fn p_correct(&self, intensity: f64, t: f64) -> f64 {
        weibull(
            intensity - t + self.epsilon,
            self.settings.beta,
            self.settings.gamma,
            self.settings.delta,
        )
    }

    /// Update the posterior with one observed trial.
    pub fn add_response(&mut self, correct: bool, intensity: f64) {
        for (i, &t) in self.thresholds.iter().enumerate() {
            let p = self.p_correct(intensity, t);
            let likelihood = if correct { p } else { 1.0 - p };
            self.log_posterior[i] += likelihood.ln();
        }
        self.n_trials += 1;
    }

    fn weights(&self) -> Vec<f64> {
        let max = self
            .log_posterior
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        self.log_posterior.iter().map(|&lp| (lp - max).exp()).collect()
    }

    /// Posterior mean of the threshold.
    pub fn mean(&self) -> f64 {
        let weights = self.weights();
        let total: f64 = weights.iter().sum();
        let weighted: f64 = weights
            .iter()
            .zip(self.thresholds.iter())
            .map(|(w, t)| w * t)
            .sum();
        weighted / total
    }

    /// Posterior standard deviation of the threshold.
    pub fn sd(&self) -> f64 {
        let weights = self.weights();
        let total: f64 = weights.iter().sum();
        let mean = self.mean();
        let var: f64 = weights
            .iter()
            .zip(self.thresholds.iter())
            .map(|(w, t)| w * (t - mean) * (t - mean))
            .sum::<f64>()
            / total;
        var.sqrt()
    }

    /// Recommended intensity for the next trial.
    pub fn next(&self) -> f64 {
        self.mean()
    }
}

/// Weibull psychometric function on a linear intensity axis,
/// `x` relative to the threshold.
fn weibull(x: f64, beta: f64, gamma: f64, delta: f64) -> f64 {
    let inner = -(10f64.powf(beta * x));
    delta * gamma + (1.0 - delta) * (1.0 - (1.0 - gamma) * inner.exp())
}

/// Offset such that `weibull(offset) == p_threshold`, i.e. the intensity at
/// which the procedure holds performance.
fn threshold_offset(p_threshold: f64, beta: f64, gamma: f64, delta: f64) -> f64 {
    let q = (p_threshold - delta * gamma) / (1.0 - delta);
    let inner = (1.0 - q) / (1.0 - gamma);
    (-(inner.ln())).log10() / beta
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> QuestSettings {
        QuestSettings::default()
    }

    #[test]
    fn offset_places_threshold_at_target_probability() {
        let s = settings();
        let eps = threshold_offset(s.p_threshold, s.beta, s.gamma, s.delta);
        let p = weibull(eps, s.beta, s.gamma, s.delta);
        assert!((p - s.p_threshold).abs() < 1e-9);
    }

    #[test]
    fn psychometric_is_bounded_by_guess_and_lapse() {
        let s = settings();
        let low = weibull(-100.0, s.beta, s.gamma, s.delta);
        let high = weibull(100.0, s.beta, s.gamma, s.delta);
        assert!((low - s.gamma).abs() < 1e-6);
        assert!(high < 1.0 && high > 0.98);
    }

    #[test]
    fn correct_responses_drive_estimate_down() {
        let mut quest = QuestHandler::new(settings());
        let start = quest.mean();
        for _ in 0..20 {
            let intensity = quest.next();
            quest.add_response(true, intensity);
        }
        assert!(quest.mean() < start);
    }

    #[test]
    fn incorrect_responses_drive_estimate_up() {
        let mut quest = QuestHandler::new(settings());
        let start = quest.mean();
        for _ in 0..20 {
            let intensity = quest.next();
            quest.add_response(false, intensity);
        }
        assert!(quest.mean() > start);
    }

    #[test]
    fn estimate_stays_on_grid_range() {
        let s = settings();
        let mut quest = QuestHandler::new(s.clone());
        for _ in 0..200 {
            quest.add_response(true, 1.0);
        }
        let mean = quest.mean();
        assert!(mean >= s.min_val && mean <= s.max_val);
    }

    #[test]
    fn posterior_narrows_with_observations() {
        let mut quest = QuestHandler::new(settings());
        let sd_before = quest.sd();
        for i in 0..40 {
            // Alternate outcomes around a fixed level, consistent with a
            // threshold near 3.0.
            quest.add_response(i % 4 != 0, 3.0);
        }
        assert!(quest.sd() < sd_before);
    }
}
