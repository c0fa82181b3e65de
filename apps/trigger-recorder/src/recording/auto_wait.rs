use crate::kind::SensorKind;
use crate::sensors::SensorReader;
use std::collections::BTreeMap;
use std::time::Instant;

pub const LATENCY_SAMPLES: usize = 6;
pub const DEFAULT_LATENCY_MULTIPLIER: f64 = 10.0;
/// Wait assigned to a kind whose read failed during measurement.
pub const FAILED_READ_WAIT_SECONDS: f64 = 999.999;
/// Wait assigned to a kind that produced no latency at all.
pub const UNMEASURED_WAIT_SECONDS: f64 = 60.0;

/// Latency of one read per kind, in seconds. `None` marks a failed read.
pub type LatencySample = BTreeMap<SensorKind, Option<f64>>;

/// Times one read of every kind, `samples` times over. Blocks on the sensors.
pub fn measure_latencies(
    reader: &dyn SensorReader,
    kinds: &[SensorKind],
    samples: usize,
) -> Vec<LatencySample> {
    (0..samples)
        .map(|_| {
            kinds
                .iter()
                .map(|kind| {
                    let started = Instant::now();
                    let latency = match reader.read(*kind) {
                        Ok(_) => Some(started.elapsed().as_secs_f64()),
                        Err(err) => {
                            tracing::debug!(kind = %kind, error = %err, "latency read failed");
                            None
                        }
                    };
                    (*kind, latency)
                })
                .collect()
        })
        .collect()
}

/// Suggested `wait_seconds` per kind: the slowest measured read times
/// `multiplier`, floored at the kind's minimum unless `set_lowest`.
pub fn auto_wait_seconds(
    kinds: &[SensorKind],
    samples: &[LatencySample],
    multiplier: f64,
    set_lowest: bool,
) -> BTreeMap<SensorKind, f64> {
    kinds
        .iter()
        .filter(|kind| !kind.records_unconditionally())
        .map(|kind| {
            let mut wait = 0.0_f64;
            for sample in samples {
                match sample.get(kind) {
                    Some(Some(latency)) => wait = wait.max(latency * multiplier),
                    Some(None) => wait = wait.max(FAILED_READ_WAIT_SECONDS),
                    None => {}
                }
            }
            if wait == 0.0 || !wait.is_finite() {
                wait = UNMEASURED_WAIT_SECONDS;
            }
            let mut wait = round6(wait);
            if !set_lowest {
                wait = wait.max(kind.min_wait_seconds());
            }
            (*kind, wait)
        })
        .collect()
}

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SensorError;
    use crate::sensors::Reading;

    fn sample(entries: &[(SensorKind, Option<f64>)]) -> LatencySample {
        entries.iter().copied().collect()
    }

    #[test]
    fn takes_slowest_sample_times_multiplier() {
        let samples = vec![
            sample(&[(SensorKind::Accelerometer, Some(0.01))]),
            sample(&[(SensorKind::Accelerometer, Some(0.0412345678))]),
        ];
        let waits = auto_wait_seconds(&[SensorKind::Accelerometer], &samples, 10.0, true);
        assert_eq!(waits[&SensorKind::Accelerometer], 0.412346);
    }

    #[test]
    fn floors_apply_unless_lowest_requested() {
        let samples = vec![sample(&[(SensorKind::CpuTemperature, Some(0.002))])];
        let floored = auto_wait_seconds(&[SensorKind::CpuTemperature], &samples, 10.0, false);
        assert_eq!(floored[&SensorKind::CpuTemperature], 15.0);

        let lowest = auto_wait_seconds(&[SensorKind::CpuTemperature], &samples, 10.0, true);
        assert_eq!(lowest[&SensorKind::CpuTemperature], 0.02);
    }

    #[test]
    fn failed_and_missing_kinds_get_fixed_waits() {
        let samples = vec![sample(&[(SensorKind::Gas, None)])];
        let waits = auto_wait_seconds(
            &[SensorKind::Gas, SensorKind::Lumen, SensorKind::SensorUptime],
            &samples,
            10.0,
            true,
        );
        assert_eq!(waits[&SensorKind::Gas], FAILED_READ_WAIT_SECONDS);
        assert_eq!(waits[&SensorKind::Lumen], UNMEASURED_WAIT_SECONDS);
        assert!(!waits.contains_key(&SensorKind::SensorUptime));
    }

    struct HalfPresent;

    impl SensorReader for HalfPresent {
        fn read(&self, kind: SensorKind) -> Result<Reading, SensorError> {
            match kind {
                SensorKind::Lumen => Ok(Reading::scalar(300.0)),
                other => Err(SensorError::NotPresent(other)),
            }
        }
    }

    #[test]
    fn measures_every_kind_for_each_sample() {
        let kinds = [SensorKind::Lumen, SensorKind::Distance];
        let samples = measure_latencies(&HalfPresent, &kinds, LATENCY_SAMPLES);
        assert_eq!(samples.len(), LATENCY_SAMPLES);
        for sample in &samples {
            assert!(matches!(sample[&SensorKind::Lumen], Some(latency) if latency >= 0.0));
            assert_eq!(sample[&SensorKind::Distance], None);
        }
    }
}
