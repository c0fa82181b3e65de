use super::monitor::{
    guarded_cycle, idle, persist_rows, CycleOutcome, FailurePolicy, MonitorExit, MonitorSettings,
};
use super::sampler::take_sample;
use crate::config::HighLowConfig;
use crate::identity::HostIdentity;
use crate::kind::SensorKind;
use crate::sensors::{Reading, SensorReader};
use crate::storage::{StorageSink, TriggerRow};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Where one channel sits relative to its band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerState {
    Starting,
    Normal,
    Low,
    High,
    SensorMissing,
}

impl TriggerState {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerState::Starting => "Starting",
            TriggerState::Normal => "Normal",
            TriggerState::Low => "Low",
            TriggerState::High => "High",
            TriggerState::SensorMissing => "Sensor Missing",
        }
    }
}

impl fmt::Display for TriggerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strictly inside the band is normal. A value sitting exactly on a bound
/// classifies as nothing and leaves the channel where it was.
pub fn classify(value: f64, low: f64, high: f64) -> Option<TriggerState> {
    if value > low && value < high {
        Some(TriggerState::Normal)
    } else if value < low {
        Some(TriggerState::Low)
    } else if value > high {
        Some(TriggerState::High)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub channel: usize,
    pub state: TriggerState,
    pub value: f64,
}

/// Per-channel state of one high/low monitor. Only changes of state are reported.
#[derive(Debug, Clone, PartialEq)]
pub struct BandTracker {
    states: Vec<TriggerState>,
}

impl BandTracker {
    pub fn new(arity: usize) -> Self {
        Self {
            states: vec![TriggerState::Starting; arity],
        }
    }

    pub fn states(&self) -> &[TriggerState] {
        &self.states
    }

    /// Moves every present channel into the state its value falls in and
    /// returns the channels that changed. Missing channels keep their state.
    pub fn observe(&mut self, reading: &Reading, config: &HighLowConfig) -> Vec<Transition> {
        let mut transitions = Vec::new();
        for (channel, state) in self.states.iter_mut().enumerate() {
            let (Some(value), Some(low), Some(high)) = (
                reading.channel(channel),
                config.low.get(channel),
                config.high.get(channel),
            ) else {
                continue;
            };
            let Some(next) = classify(value, *low, *high) else {
                continue;
            };
            if next != *state {
                *state = next;
                transitions.push(Transition {
                    channel,
                    state: next,
                    value,
                });
            }
        }
        transitions
    }

    /// Returns true when the channels were not already marked missing.
    pub fn mark_missing(&mut self) -> bool {
        if self
            .states
            .iter()
            .all(|state| *state == TriggerState::SensorMissing)
        {
            return false;
        }
        self.states.fill(TriggerState::SensorMissing);
        true
    }
}

/// One row per new state, holding the channels that entered it, in the
/// order the states first appear.
pub fn transition_rows(
    kind: SensorKind,
    timestamp: DateTime<Utc>,
    identity: &HostIdentity,
    columns: &[&'static str],
    transitions: &[Transition],
) -> Vec<TriggerRow> {
    let mut grouped: Vec<(TriggerState, Vec<(&'static str, f64)>)> = Vec::new();
    for transition in transitions {
        let Some(column) = columns.get(transition.channel) else {
            continue;
        };
        match grouped
            .iter_mut()
            .find(|(state, _)| *state == transition.state)
        {
            Some((_, channels)) => channels.push((*column, transition.value)),
            None => grouped.push((transition.state, vec![(*column, transition.value)])),
        }
    }
    grouped
        .into_iter()
        .map(|(state, channels)| TriggerRow::transition(kind, timestamp, identity, state, channels))
        .collect()
}

/// Polls one sensor kind every `wait_seconds` and records each channel's
/// move between low, normal and high.
pub struct HighLowMonitor {
    kind: SensorKind,
    columns: &'static [&'static str],
    config: HighLowConfig,
    reader: Arc<dyn SensorReader>,
    sink: Arc<dyn StorageSink>,
    identity: HostIdentity,
    failures: FailurePolicy,
    updates: Option<watch::Receiver<HighLowConfig>>,
    tracker: BandTracker,
}

impl HighLowMonitor {
    pub fn new(
        kind: SensorKind,
        columns: &'static [&'static str],
        config: HighLowConfig,
        reader: Arc<dyn SensorReader>,
        sink: Arc<dyn StorageSink>,
    ) -> Self {
        Self {
            kind,
            columns,
            config,
            reader,
            sink,
            identity: HostIdentity::anonymous(),
            failures: FailurePolicy::new(MonitorSettings::default()),
            updates: None,
            tracker: BandTracker::new(columns.len()),
        }
    }

    pub fn with_identity(mut self, identity: HostIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_settings(mut self, settings: MonitorSettings) -> Self {
        self.failures = FailurePolicy::new(settings);
        self
    }

    pub fn with_updates(mut self, updates: watch::Receiver<HighLowConfig>) -> Self {
        self.updates = Some(updates);
        self
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn states(&self) -> &[TriggerState] {
        self.tracker.states()
    }

    pub fn start(self, cancel: CancellationToken) -> JoinHandle<MonitorExit> {
        tokio::spawn(self.run(cancel))
    }

    pub async fn run(mut self, cancel: CancellationToken) -> MonitorExit {
        tracing::info!(
            kind = %self.kind,
            wait_seconds = self.config.wait_seconds,
            low = ?self.config.low,
            high = ?self.config.high,
            "high/low monitor started"
        );
        loop {
            self.apply_pending_config();
            if !self.config.enabled {
                tracing::info!(kind = %self.kind, "high/low trigger disabled; monitor stopping");
                return MonitorExit::Disabled;
            }

            let kind = self.kind;
            let outcome = guarded_cycle(kind, self.run_cycle(&cancel)).await;
            if outcome == CycleOutcome::Cancelled || cancel.is_cancelled() {
                break;
            }
            if let Some(pause) = self.failures.pause_after(kind, &outcome) {
                if !idle(&cancel, pause).await {
                    break;
                }
            }
        }
        tracing::info!(kind = %self.kind, "high/low monitor stopped");
        MonitorExit::Cancelled
    }

    /// Reads once, records any state changes, then waits `wait_seconds`.
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> CycleOutcome {
        let sample = tokio::select! {
            _ = cancel.cancelled() => return CycleOutcome::Cancelled,
            sample = take_sample(&self.reader, self.kind, self.columns.len()) => sample,
        };

        let outcome = match &sample.reading {
            Ok(reading) => {
                let transitions = self.tracker.observe(reading, &self.config);
                if transitions.is_empty() {
                    CycleOutcome::Unchanged
                } else {
                    tracing::debug!(kind = %self.kind, ?transitions, "high/low state changed");
                    let rows = transition_rows(
                        self.kind,
                        sample.timestamp,
                        &self.identity,
                        self.columns,
                        &transitions,
                    );
                    persist_rows(&self.sink, self.kind, rows).await
                }
            }
            Err(err) => {
                if err.is_not_present() && self.tracker.mark_missing() {
                    tracing::warn!(kind = %self.kind, "high/low sensor missing");
                } else if !err.is_not_present() {
                    tracing::warn!(kind = %self.kind, error = %err, "high/low reading failed");
                }
                CycleOutcome::ReadFailed {
                    not_present: err.is_not_present(),
                }
            }
        };

        idle(cancel, self.config.wait()).await;
        outcome
    }

    fn apply_pending_config(&mut self) {
        let Some(updates) = self.updates.as_mut() else {
            return;
        };
        if !updates.has_changed().unwrap_or(false) {
            return;
        }
        let config = updates.borrow_and_update().clone();
        tracing::info!(
            kind = %self.kind,
            enabled = config.enabled,
            wait_seconds = config.wait_seconds,
            low = ?config.low,
            high = ?config.high,
            "high/low configuration updated"
        );
        self.config = config;
    }
}
