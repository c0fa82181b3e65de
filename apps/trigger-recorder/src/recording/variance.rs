use crate::sensors::Reading;

/// Per-channel change thresholds for one monitor. A channel "changes" only
/// when its absolute difference is strictly greater than its threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Variance {
    thresholds: Vec<f64>,
}

impl Variance {
    pub fn per_channel(thresholds: Vec<f64>) -> Self {
        Self { thresholds }
    }

    pub fn uniform(threshold: f64, arity: usize) -> Self {
        Self {
            thresholds: vec![threshold; arity],
        }
    }

    /// Used by kinds that record every cycle.
    pub fn none() -> Self {
        Self {
            thresholds: Vec::new(),
        }
    }

    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    pub fn arity(&self) -> usize {
        self.thresholds.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarianceDecision {
    pub differences: Vec<f64>,
    pub exceeded: Vec<usize>,
}

impl VarianceDecision {
    pub fn changed(&self) -> bool {
        !self.exceeded.is_empty()
    }

    pub fn unchanged(arity: usize) -> Self {
        Self {
            differences: vec![0.0; arity],
            exceeded: Vec::new(),
        }
    }
}

/// Absolute difference of one channel. A channel missing on either side counts as 0.0.
pub fn channel_difference(oldest: &Reading, newest: &Reading, idx: usize) -> f64 {
    match (oldest.channel(idx), newest.channel(idx)) {
        (Some(a), Some(b)) => (b - a).abs(),
        _ => 0.0,
    }
}

/// Compares two readings channel by channel; any single channel over its own
/// threshold flags the whole pair.
pub fn evaluate(oldest: &Reading, newest: &Reading, variance: &Variance) -> VarianceDecision {
    let differences: Vec<f64> = (0..variance.arity())
        .map(|idx| channel_difference(oldest, newest, idx))
        .collect();
    let exceeded = differences
        .iter()
        .zip(variance.thresholds())
        .enumerate()
        .filter(|(_, (difference, threshold))| difference > threshold)
        .map(|(idx, _)| idx)
        .collect();
    VarianceDecision {
        differences,
        exceeded,
    }
}

pub fn exceeds_variance(oldest: &Reading, newest: &Reading, variance: &Variance) -> bool {
    evaluate(oldest, newest, variance).changed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_threshold_is_strict() {
        let variance = Variance::uniform(5.0, 1);
        let base = Reading::scalar(40.0);
        assert!(!exceeds_variance(&base, &Reading::scalar(44.9), &variance));
        assert!(!exceeds_variance(&base, &Reading::scalar(45.0), &variance));
        assert!(exceeds_variance(&base, &Reading::scalar(45.1), &variance));
        assert!(exceeds_variance(&base, &Reading::scalar(34.0), &variance));
    }

    #[test]
    fn zero_variance_triggers_on_any_change() {
        let variance = Variance::uniform(0.0, 1);
        let base = Reading::scalar(21.0);
        assert!(!exceeds_variance(&base, &Reading::scalar(21.0), &variance));
        assert!(exceeds_variance(&base, &Reading::scalar(21.000_001), &variance));
    }

    #[test]
    fn one_axis_is_enough() {
        let variance = Variance::per_channel(vec![0.1, 0.1, 0.1]);
        let base = Reading::from_values([0.0, 0.0, 1.0]);

        let small = evaluate(&base, &Reading::from_values([0.0, 0.0, 1.05]), &variance);
        assert!(!small.changed());

        let large = evaluate(&base, &Reading::from_values([0.0, 0.0, 1.2]), &variance);
        assert!(large.changed());
        assert_eq!(large.exceeded, vec![2]);
    }

    #[test]
    fn each_channel_uses_its_own_threshold() {
        let variance = Variance::per_channel(vec![1.0, 50.0]);
        let base = Reading::from_values([0.0, 0.0]);
        let decision = evaluate(&base, &Reading::from_values([2.0, 2.0]), &variance);
        assert_eq!(decision.exceeded, vec![0]);
    }

    #[test]
    fn missing_channel_counts_as_no_change() {
        let variance = Variance::uniform(10.0, 4);
        let base = Reading::from_values([100.0, 100.0, 100.0, 100.0]);
        let newest = Reading::from_channels(vec![Some(105.0), None, Some(95.0), Some(101.0)]);
        let decision = evaluate(&base, &newest, &variance);
        assert_eq!(decision.differences[1], 0.0);
        assert!(!decision.changed());
    }

    #[test]
    fn short_reading_counts_as_no_change() {
        let variance = Variance::uniform(1.0, 3);
        let decision = evaluate(
            &Reading::from_values([0.0]),
            &Reading::from_values([0.5, 9.0, 9.0]),
            &variance,
        );
        assert_eq!(decision.differences, vec![0.5, 0.0, 0.0]);
        assert!(!decision.changed());
    }
}
