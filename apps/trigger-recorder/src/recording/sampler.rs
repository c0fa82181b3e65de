use crate::error::SensorError;
use crate::kind::SensorKind;
use crate::sensors::{Reading, SensorReader};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const READINGS_PER_SET: usize = 2;

/// One polling instant. A failed read still carries its timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingSample {
    pub timestamp: DateTime<Utc>,
    pub reading: Result<Reading, SensorError>,
}

impl ReadingSample {
    pub fn value(&self) -> Option<&Reading> {
        self.reading.as_ref().ok()
    }

    pub fn error(&self) -> Option<&SensorError> {
        self.reading.as_ref().err()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadingSet {
    pub oldest: ReadingSample,
    pub newest: ReadingSample,
}

impl ReadingSet {
    pub fn samples(&self) -> [&ReadingSample; READINGS_PER_SET] {
        [&self.oldest, &self.newest]
    }

    pub fn first_error(&self) -> Option<&SensorError> {
        self.samples().into_iter().find_map(ReadingSample::error)
    }
}

/// Reads one sample on the blocking pool. Readings with the wrong number of
/// channels are turned into an error so the caller never compares mismatched tuples.
pub async fn take_sample(
    reader: &Arc<dyn SensorReader>,
    kind: SensorKind,
    expected_arity: usize,
) -> ReadingSample {
    let handle = Arc::clone(reader);
    let reading = match tokio::task::spawn_blocking(move || handle.read(kind)).await {
        Ok(reading) => reading,
        Err(err) => Err(SensorError::driver(kind, format!("read task failed: {err}"))),
    };
    let reading = reading.and_then(|reading| {
        if reading.len() == expected_arity {
            Ok(reading)
        } else {
            Err(SensorError::Arity {
                kind,
                expected: expected_arity,
                got: reading.len(),
            })
        }
    });
    ReadingSample {
        timestamp: Utc::now(),
        reading,
    }
}

/// Takes a fresh pair of samples spaced by `wait`. Returns `None` if cancelled
/// before the pair is complete.
pub async fn sample_reading_set(
    reader: &Arc<dyn SensorReader>,
    kind: SensorKind,
    expected_arity: usize,
    wait: Duration,
    cancel: &CancellationToken,
) -> Option<ReadingSet> {
    let oldest = tokio::select! {
        _ = cancel.cancelled() => return None,
        sample = take_sample(reader, kind, expected_arity) => sample,
    };
    tokio::select! {
        _ = cancel.cancelled() => return None,
        _ = tokio::time::sleep(wait) => {}
    }
    let newest = tokio::select! {
        _ = cancel.cancelled() => return None,
        sample = take_sample(reader, kind, expected_arity) => sample,
    };
    Some(ReadingSet { oldest, newest })
}
