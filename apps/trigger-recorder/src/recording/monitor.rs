use super::sampler::{sample_reading_set, take_sample, ReadingSample};
use super::variance::evaluate;
use crate::config::TriggerConfig;
use crate::error::{SensorError, SinkError};
use crate::identity::HostIdentity;
use crate::kind::SensorKind;
use crate::sensors::SensorReader;
use crate::storage::{StorageSink, TriggerRow};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    /// Failed cycles tolerated inside one burst before backing off.
    pub max_errors: u32,
    /// A gap longer than this between failures starts a new burst.
    pub error_reset_after: Duration,
    pub error_backoff: Duration,
    /// Idle applied after a read reports the device as absent.
    pub not_present_idle: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            max_errors: 10,
            error_reset_after: Duration::from_secs(60),
            error_backoff: Duration::from_secs(60),
            not_present_idle: Duration::from_secs(10),
        }
    }
}

/// Counts failed cycles within a burst.
#[derive(Debug, Clone)]
pub struct ErrorBudget {
    max_errors: u32,
    reset_after: Duration,
    count: u32,
    last_failure: Option<Instant>,
}

impl ErrorBudget {
    pub fn new(settings: &MonitorSettings) -> Self {
        Self {
            max_errors: settings.max_errors,
            reset_after: settings.error_reset_after,
            count: 0,
            last_failure: None,
        }
    }

    /// Returns true once the burst exceeds the budget; the counter starts over afterwards.
    pub fn record_failure(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_failure {
            if now.saturating_duration_since(last) > self.reset_after {
                self.count = 0;
            }
        }
        self.count += 1;
        self.last_failure = Some(now);
        if self.count > self.max_errors {
            self.count = 0;
            self.last_failure = None;
            return true;
        }
        false
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Cancelled,
    Unchanged,
    Recorded { written: usize, dropped: usize },
    ReadFailed { not_present: bool },
    Panicked,
}

impl CycleOutcome {
    pub(crate) fn is_failure(&self) -> bool {
        match self {
            CycleOutcome::Recorded { dropped, .. } => *dropped > 0,
            CycleOutcome::ReadFailed { .. } | CycleOutcome::Panicked => true,
            CycleOutcome::Cancelled | CycleOutcome::Unchanged => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    Cancelled,
    /// A new configuration snapshot switched the trigger off.
    Disabled,
}

/// Watches one sensor kind and persists reading pairs whose change exceeds
/// the configured variance.
pub struct VarianceMonitor {
    kind: SensorKind,
    columns: &'static [&'static str],
    config: TriggerConfig,
    reader: Arc<dyn SensorReader>,
    sink: Arc<dyn StorageSink>,
    identity: HostIdentity,
    failures: FailurePolicy,
    updates: Option<watch::Receiver<TriggerConfig>>,
}

impl VarianceMonitor {
    pub fn new(
        kind: SensorKind,
        columns: &'static [&'static str],
        config: TriggerConfig,
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

    pub fn with_updates(mut self, updates: watch::Receiver<TriggerConfig>) -> Self {
        self.updates = Some(updates);
        self
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    pub fn start(self, cancel: CancellationToken) -> JoinHandle<MonitorExit> {
        tokio::spawn(self.run(cancel))
    }

    pub async fn run(mut self, cancel: CancellationToken) -> MonitorExit {
        tracing::info!(
            kind = %self.kind,
            wait_seconds = self.config.wait_seconds,
            variance = ?self.config.variance.thresholds(),
            "trigger monitor started"
        );
        loop {
            self.apply_pending_config();
            if !self.config.enabled {
                tracing::info!(kind = %self.kind, "trigger disabled; monitor stopping");
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
        tracing::info!(kind = %self.kind, "trigger monitor stopped");
        MonitorExit::Cancelled
    }

    /// One full sampling cycle. Read and sink failures are logged and absorbed.
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> CycleOutcome {
        if self.kind.records_unconditionally() {
            return self.run_unconditional_cycle(cancel).await;
        }

        let Some(set) = sample_reading_set(
            &self.reader,
            self.kind,
            self.columns.len(),
            self.config.wait(),
            cancel,
        )
        .await
        else {
            return CycleOutcome::Cancelled;
        };

        let (oldest, newest) = match (&set.oldest.reading, &set.newest.reading) {
            (Ok(oldest), Ok(newest)) => (oldest, newest),
            _ => {
                let not_present = set.first_error().is_some_and(SensorError::is_not_present);
                if let Some(err) = set.first_error() {
                    tracing::warn!(kind = %self.kind, error = %err, "trigger reading failed");
                }
                return CycleOutcome::ReadFailed { not_present };
            }
        };

        let decision = evaluate(oldest, newest, &self.config.variance);
        if !decision.changed() {
            tracing::trace!(
                kind = %self.kind,
                differences = ?decision.differences,
                "reading within variance"
            );
            return CycleOutcome::Unchanged;
        }

        tracing::debug!(
            kind = %self.kind,
            channels = ?decision.exceeded,
            differences = ?decision.differences,
            "variance exceeded"
        );
        let rows = set
            .samples()
            .into_iter()
            .filter_map(|sample| self.row_for(sample))
            .collect();
        self.persist(rows).await
    }

    async fn run_unconditional_cycle(&mut self, cancel: &CancellationToken) -> CycleOutcome {
        let sample = tokio::select! {
            _ = cancel.cancelled() => return CycleOutcome::Cancelled,
            sample = take_sample(&self.reader, self.kind, self.columns.len()) => sample,
        };
        let outcome = match self.row_for(&sample) {
            Some(row) => self.persist(vec![row]).await,
            None => {
                let not_present = sample.error().is_some_and(SensorError::is_not_present);
                if let Some(err) = sample.error() {
                    tracing::warn!(kind = %self.kind, error = %err, "reading failed");
                }
                CycleOutcome::ReadFailed { not_present }
            }
        };
        idle(cancel, self.config.wait()).await;
        outcome
    }

    fn row_for(&self, sample: &ReadingSample) -> Option<TriggerRow> {
        let reading = sample.value()?;
        Some(TriggerRow::new(
            self.kind,
            sample.timestamp,
            &self.identity,
            self.columns,
            reading,
        ))
    }

    async fn persist(&self, rows: Vec<TriggerRow>) -> CycleOutcome {
        persist_rows(&self.sink, self.kind, rows).await
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
            variance = ?config.variance.thresholds(),
            "trigger configuration updated"
        );
        self.config = config;
    }
}

/// Decides how long a monitor rests after a cycle: the error backoff once a
/// burst exceeds `max_errors`, at least `not_present_idle` when the device is absent.
#[derive(Debug, Clone)]
pub(crate) struct FailurePolicy {
    settings: MonitorSettings,
    budget: ErrorBudget,
}

impl FailurePolicy {
    pub(crate) fn new(settings: MonitorSettings) -> Self {
        Self {
            budget: ErrorBudget::new(&settings),
            settings,
        }
    }

    pub(crate) fn pause_after(
        &mut self,
        kind: SensorKind,
        outcome: &CycleOutcome,
    ) -> Option<Duration> {
        let mut pause = None;
        if outcome.is_failure() && self.budget.record_failure(Instant::now()) {
            tracing::warn!(
                kind = %kind,
                max_errors = self.settings.max_errors,
                backoff_secs = self.settings.error_backoff.as_secs_f64(),
                "too many trigger errors; backing off"
            );
            pause = Some(self.settings.error_backoff);
        }
        if matches!(outcome, CycleOutcome::ReadFailed { not_present: true }) {
            let idle = self.settings.not_present_idle;
            pause = Some(pause.map_or(idle, |backoff: Duration| backoff.max(idle)));
        }
        pause
    }
}

/// Runs one cycle behind a panic boundary so a bad cycle costs only itself.
pub(crate) async fn guarded_cycle<F>(kind: SensorKind, cycle: F) -> CycleOutcome
where
    F: Future<Output = CycleOutcome>,
{
    match AssertUnwindSafe(cycle).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            tracing::error!(
                kind = %kind,
                panic = %panic_message(&*panic),
                "trigger cycle panicked"
            );
            CycleOutcome::Panicked
        }
    }
}

/// Sleeps unless cancelled first. Returns false on cancellation.
pub(crate) async fn idle(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Writes rows in order; a failed write is logged and dropped without
/// holding back the rows after it.
pub(crate) async fn persist_rows(
    sink: &Arc<dyn StorageSink>,
    kind: SensorKind,
    rows: Vec<TriggerRow>,
) -> CycleOutcome {
    let mut written = 0;
    let mut dropped = 0;
    for row in rows {
        let datetime = row.datetime_text();
        match write_row(sink, row).await {
            Ok(()) => written += 1,
            Err(err) => {
                dropped += 1;
                tracing::error!(
                    kind = %kind,
                    datetime = %datetime,
                    error = %err,
                    "failed to write trigger row"
                );
            }
        }
    }
    if written > 0 {
        tracing::debug!(kind = %kind, written, "trigger rows recorded");
    }
    CycleOutcome::Recorded { written, dropped }
}

async fn write_row(sink: &Arc<dyn StorageSink>, row: TriggerRow) -> Result<(), SinkError> {
    let sink = Arc::clone(sink);
    match tokio::task::spawn_blocking(move || sink.write_row(&row)).await {
        Ok(result) => result,
        Err(err) => Err(SinkError::Task(err.to_string())),
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_trips_after_a_burst_and_starts_over() {
        let settings = MonitorSettings {
            max_errors: 3,
            ..MonitorSettings::default()
        };
        let mut budget = ErrorBudget::new(&settings);
        let now = Instant::now();
        assert!(!budget.record_failure(now));
        assert!(!budget.record_failure(now));
        assert!(!budget.record_failure(now));
        assert!(budget.record_failure(now));
        assert_eq!(budget.count(), 0);
        assert!(!budget.record_failure(now));
    }

    #[test]
    fn budget_resets_after_a_quiet_gap() {
        let settings = MonitorSettings {
            max_errors: 2,
            error_reset_after: Duration::from_secs(60),
            ..MonitorSettings::default()
        };
        let mut budget = ErrorBudget::new(&settings);
        let start = Instant::now();
        budget.record_failure(start);
        budget.record_failure(start);
        assert!(!budget.record_failure(start + Duration::from_secs(61)));
        assert_eq!(budget.count(), 1);
    }

    #[test]
    fn policy_pauses_only_after_the_burst() {
        let settings = MonitorSettings {
            max_errors: 1,
            error_backoff: Duration::from_secs(30),
            not_present_idle: Duration::from_secs(10),
            ..MonitorSettings::default()
        };
        let mut policy = FailurePolicy::new(settings);
        let failed = CycleOutcome::ReadFailed { not_present: false };
        assert_eq!(policy.pause_after(SensorKind::Lumen, &failed), None);
        assert_eq!(
            policy.pause_after(SensorKind::Lumen, &failed),
            Some(Duration::from_secs(30))
        );
        assert_eq!(policy.pause_after(SensorKind::Lumen, &CycleOutcome::Unchanged), None);
        assert_eq!(
            policy.pause_after(SensorKind::Lumen, &CycleOutcome::ReadFailed { not_present: true }),
            Some(Duration::from_secs(10))
        );
    }

    async fn corrupted_cycle() -> CycleOutcome {
        panic!("driver state corrupted")
    }

    #[tokio::test]
    async fn panicking_cycle_is_contained() {
        let outcome = guarded_cycle(SensorKind::Gas, corrupted_cycle()).await;
        assert_eq!(outcome, CycleOutcome::Panicked);
        assert!(outcome.is_failure());
    }

    #[test]
    fn panic_payloads_are_readable() {
        let static_str: Box<dyn Any + Send> = Box::new("sensor bus exploded");
        assert_eq!(panic_message(&*static_str), "sensor bus exploded");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*owned), "owned");
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(&*other), "unknown panic");
    }
}
