//! Windowed improvement check used for early stopping.

/// Scores recorded by an ascent, one per completed step.
#[derive(Debug, Clone)]
pub struct ScoreHistory {
    scores: Vec<f32>,
    interval: usize,
}

impl ScoreHistory {
    /// An empty history compared in windows of `interval` scores.
    #[must_use]
    pub fn new(interval: usize) -> Self {
        Self {
            scores: Vec::new(),
            interval,
        }
    }

    pub fn push(&mut self, score: f32) {
        self.scores.push(score);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<f32> {
        self.scores.last().copied()
    }

    #[must_use]
    pub fn scores(&self) -> &[f32] {
        &self.scores
    }

    /// Fractional improvement of the latest window over the one before it.
    ///
    /// Only defined when the history ends exactly on a window boundary and
    /// holds at least two full windows. Windows are compared by their mean,
    /// relative to the magnitude of the previous mean (floored at
    /// `f32::EPSILON`).
    #[must_use]
    pub fn improvement(&self) -> Option<f32> {
        let n = self.scores.len();
        let w = self.interval;

        if w == 0 || n < 2 * w || n % w != 0 {
            return None;
        }

        let recent = mean(&self.scores[n - w..]);
        let previous = mean(&self.scores[n - 2 * w..n - w]);

        Some((recent - previous) / previous.abs().max(f32::EPSILON))
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(window: &[f32]) -> f32 {
    window.iter().sum::<f32>() / window.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(interval: usize, scores: &[f32]) -> ScoreHistory {
        let mut history = ScoreHistory::new(interval);
        for &score in scores {
            history.push(score);
        }
        history
    }

    #[test]
    fn test_no_check_before_two_windows() {
        assert_eq!(history(3, &[1.0, 2.0, 3.0]).improvement(), None);
        assert_eq!(history(3, &[1.0, 2.0, 3.0, 4.0, 5.0]).improvement(), None);
    }

    #[test]
    fn test_check_only_on_window_boundary() {
        let scores = [1.0, 1.0, 2.0, 2.0, 3.0];
        assert!(history(2, &scores[..4]).improvement().is_some());
        assert_eq!(history(2, &scores).improvement(), None);
    }

    #[test]
    fn test_improvement_compares_consecutive_window_means() {
        // previous window mean 2.0, recent window mean 3.0
        let improvement = history(2, &[100.0, 100.0, 1.0, 3.0, 2.0, 4.0])
            .improvement()
            .unwrap();

        assert!((improvement - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_negative_improvement() {
        let improvement = history(1, &[-2.0, -3.0]).improvement().unwrap();
        assert!((improvement + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_zero_previous_window() {
        let improvement = history(1, &[0.0, 0.0]).improvement().unwrap();
        assert!(improvement.abs() < f32::EPSILON);
    }

    #[test]
    fn test_history_grows_without_preallocation() {
        let mut history = ScoreHistory::new(2);
        assert!(history.is_empty());

        for score in [1.0, 2.0, 3.0, 4.0] {
            history.push(score);
        }

        assert_eq!(history.len(), 4);
        assert_eq!(history.last(), Some(4.0));
        assert!(history.improvement().is_some());
    }
}
