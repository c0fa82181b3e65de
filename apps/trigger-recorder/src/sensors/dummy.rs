use super::{Reading, SensorReader};
use crate::error::SensorError;
use crate::kind::{ColourChannels, SensorKind, RGB_FROM_SPECTRAL};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

/// Synthetic sensors for bench runs without hardware. Each kind random-walks
/// around a plausible baseline with steps sized to occasionally cross the
/// factory variance.
pub struct DummySensors {
    colour: ColourChannels,
    started_at: Instant,
    last: Mutex<HashMap<SensorKind, Vec<f64>>>,
}

impl DummySensors {
    pub fn new(colour: ColourChannels) -> Self {
        Self {
            colour,
            started_at: Instant::now(),
            last: Mutex::new(HashMap::new()),
        }
    }
}

fn baseline(kind: SensorKind) -> Vec<f64> {
    match kind {
        SensorKind::SensorUptime => vec![0.0],
        SensorKind::CpuTemperature => vec![45.0],
        SensorKind::EnvTemperature => vec![22.0],
        SensorKind::Pressure => vec![1013.0],
        SensorKind::Altitude => vec![120.0],
        SensorKind::Humidity => vec![40.0],
        SensorKind::Distance => vec![100.0],
        SensorKind::Gas => vec![100.0, 50.0, 200.0, 30.0],
        SensorKind::ParticulateMatter => vec![2.0, 3.0, 5.0],
        SensorKind::Lumen => vec![300.0],
        SensorKind::Colour => vec![200.0; 6],
        SensorKind::UltraViolet => vec![1.0, 20.0, 15.0],
        SensorKind::Accelerometer => vec![0.0, 0.0, 1.0],
        SensorKind::Magnetometer => vec![20.0, -5.0, 40.0],
        SensorKind::Gyroscope => vec![0.0, 0.0, 0.0],
    }
}

impl SensorReader for DummySensors {
    fn read(&self, kind: SensorKind) -> Result<Reading, SensorError> {
        if kind == SensorKind::SensorUptime {
            return Ok(Reading::scalar(
                self.started_at.elapsed().as_secs_f64() / 60.0,
            ));
        }

        let mut last = self
            .last
            .lock()
            .map_err(|_| SensorError::driver(kind, "dummy state lock poisoned"))?;
        let values = last.entry(kind).or_insert_with(|| baseline(kind));

        let mut rng = rand::thread_rng();
        for (value, variance) in values.iter_mut().zip(kind.default_variance()) {
            *value += rng.gen_range(-1.0_f64..=1.0) * *variance * 0.6;
        }

        let reading = Reading::from_values(values.iter().copied());
        if kind == SensorKind::Colour && self.colour == ColourChannels::Rgb {
            return Ok(reading.select(&RGB_FROM_SPECTRAL));
        }
        Ok(reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readings_match_layout_arity() {
        let sensors = DummySensors::new(ColourChannels::Rgb);
        for kind in SensorKind::ALL {
            let reading = sensors.read(kind).unwrap();
            assert_eq!(reading.len(), kind.arity(ColourChannels::Rgb), "{kind}");
        }

        let spectral = DummySensors::new(ColourChannels::Spectral);
        assert_eq!(spectral.read(SensorKind::Colour).unwrap().len(), 6);
    }
}
