pub mod dummy;
pub mod system;

use crate::error::SensorError;
use crate::kind::{ColourChannels, SensorKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One polled value set. A channel is `None` when the driver could not produce
/// a usable number for it (failed sub-read, unparseable text, NaN).
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    channels: Vec<Option<f64>>,
}

impl Reading {
    pub fn scalar(value: f64) -> Self {
        Self::from_values([value])
    }

    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        Self {
            channels: values
                .into_iter()
                .map(|value| Some(value).filter(|v| v.is_finite()))
                .collect(),
        }
    }

    pub fn from_channels(channels: Vec<Option<f64>>) -> Self {
        Self {
            channels: channels
                .into_iter()
                .map(|value| value.filter(|v| v.is_finite()))
                .collect(),
        }
    }

    /// Drivers that hand back text get each channel parsed independently.
    pub fn parse_channels<S: AsRef<str>>(raw: &[S]) -> Self {
        Self::from_channels(
            raw.iter()
                .map(|value| value.as_ref().trim().parse::<f64>().ok())
                .collect(),
        )
    }

    pub fn channel(&self, idx: usize) -> Option<f64> {
        self.channels.get(idx).copied().flatten()
    }

    pub fn channels(&self) -> &[Option<f64>] {
        &self.channels
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            channels: indices.iter().map(|idx| self.channel(*idx)).collect(),
        }
    }
}

/// Hardware access. Calls block on the bus, so callers run them off the async runtime.
pub trait SensorReader: Send + Sync {
    fn read(&self, kind: SensorKind) -> Result<Reading, SensorError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    System,
    Dummy,
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(ProviderKind::System),
            "dummy" => Ok(ProviderKind::Dummy),
            other => Err(format!("unknown sensor provider {other:?}")),
        }
    }
}

pub fn build_reader(provider: ProviderKind, colour: ColourChannels) -> Arc<dyn SensorReader> {
    match provider {
        ProviderKind::System => Arc::new(system::SystemSensors::new()),
        ProviderKind::Dummy => Arc::new(dummy::DummySensors::new(colour)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unparseable_channels_become_missing() {
        let reading = Reading::parse_channels(&["12.5", "Failed", " 3 ", ""]);
        assert_eq!(reading.len(), 4);
        assert_eq!(reading.channel(0), Some(12.5));
        assert_eq!(reading.channel(1), None);
        assert_eq!(reading.channel(2), Some(3.0));
        assert_eq!(reading.channel(3), None);
    }

    #[test]
    fn non_finite_values_are_dropped() {
        let reading = Reading::from_values([1.0, f64::NAN, f64::INFINITY]);
        assert_eq!(reading.channels(), &[Some(1.0), None, None]);
    }

    #[test]
    fn select_reorders_and_tolerates_missing_indices() {
        let reading = Reading::from_values([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let picked = reading.select(&[0, 3, 4, 9]);
        assert_eq!(picked.channels(), &[Some(1.0), Some(4.0), Some(5.0), None]);
    }
}
