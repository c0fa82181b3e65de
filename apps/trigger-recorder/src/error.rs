use crate::kind::SensorKind;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SensorError {
    #[error("no {0} sensor present")]
    NotPresent(SensorKind),
    #[error("{kind} driver error: {message}")]
    Driver { kind: SensorKind, message: String },
    #[error("{kind} returned {got} channels, expected {expected}")]
    Arity {
        kind: SensorKind,
        expected: usize,
        got: usize,
    },
}

impl SensorError {
    pub fn driver(kind: SensorKind, message: impl Into<String>) -> Self {
        Self::Driver {
            kind,
            message: message.into(),
        }
    }

    pub fn is_not_present(&self) -> bool {
        matches!(self, Self::NotPresent(_))
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("row has {values} values for {columns} columns")]
    Shape { columns: usize, values: usize },
    #[error("sink task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("{kind}: variance has {got} entries, expected 1 or {expected}")]
    VarianceArity {
        kind: SensorKind,
        expected: usize,
        got: usize,
    },
    #[error("{kind}: variance {value} must be a finite, non-negative number")]
    InvalidVariance { kind: SensorKind, value: f64 },
    #[error("{kind}: wait_seconds {value} must be a non-negative number of seconds a timer can hold")]
    InvalidWait { kind: SensorKind, value: f64 },
    #[error("{kind}: {bound} thresholds have {got} entries, expected 1 or {expected}")]
    ThresholdArity {
        kind: SensorKind,
        bound: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("{kind}: {bound} threshold {value} must be a finite number")]
    InvalidThreshold {
        kind: SensorKind,
        bound: &'static str,
        value: f64,
    },
    #[error("{kind}: channel {channel} low {low} is not below high {high}")]
    InvertedBand {
        kind: SensorKind,
        channel: usize,
        low: f64,
        high: f64,
    },
    #[error("{kind}: {message}")]
    Unavailable { kind: SensorKind, message: String },
}
