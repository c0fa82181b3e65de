use super::high_low::HighLowMonitor;
use super::monitor::{idle, panic_message, MonitorExit, MonitorSettings, VarianceMonitor};
use crate::config::{ConfigStore, HighLowConfig, TriggerConfig};
use crate::error::ConfigError;
use crate::identity::HostIdentity;
use crate::kind::SensorKind;
use crate::sensors::SensorReader;
use crate::storage::StorageSink;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{Id, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TriggerMode {
    /// Before/after pairs whose change exceeds the variance.
    Variance,
    /// Each channel's move between low, normal and high.
    HighLow,
}

impl TriggerMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerMode::Variance => "variance",
            TriggerMode::HighLow => "high_low",
        }
    }
}

/// Identifies one running monitor. A kind can run in both modes at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonitorKey {
    pub kind: SensorKind,
    pub mode: TriggerMode,
}

impl MonitorKey {
    pub fn new(kind: SensorKind, mode: TriggerMode) -> Self {
        Self { kind, mode }
    }
}

impl fmt::Display for MonitorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.mode.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlannedConfig {
    Variance(TriggerConfig),
    HighLow(HighLowConfig),
}

/// A monitor the supervisor decided to launch, with its column layout resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorPlan {
    pub kind: SensorKind,
    pub mode: TriggerMode,
    pub columns: &'static [&'static str],
    pub config: PlannedConfig,
}

impl MonitorPlan {
    pub fn key(&self) -> MonitorKey {
        MonitorKey::new(self.kind, self.mode)
    }
}

enum SlotUpdates {
    Variance(watch::Sender<TriggerConfig>),
    HighLow(watch::Sender<HighLowConfig>),
}

struct MonitorSlot {
    columns: &'static [&'static str],
    updates: SlotUpdates,
}

type Slots = Arc<HashMap<MonitorKey, MonitorSlot>>;

/// Launches one monitor per enabled, installed sensor kind and trigger mode
/// and keeps them alive for the life of the process.
#[derive(Clone)]
pub struct RecordingSupervisor {
    store: Arc<dyn ConfigStore>,
    reader: Arc<dyn SensorReader>,
    sink: Arc<dyn StorageSink>,
    identity: HostIdentity,
    settings: MonitorSettings,
    restart_backoff: Duration,
}

impl RecordingSupervisor {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        reader: Arc<dyn SensorReader>,
        sink: Arc<dyn StorageSink>,
    ) -> Self {
        Self {
            store,
            reader,
            sink,
            identity: HostIdentity::anonymous(),
            settings: MonitorSettings::default(),
            restart_backoff: Duration::from_secs(5),
        }
    }

    pub fn with_identity(mut self, identity: HostIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_monitor_settings(mut self, settings: MonitorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_restart_backoff(mut self, backoff: Duration) -> Self {
        self.restart_backoff = backoff;
        self
    }

    /// Monitors to launch. Each mode has its own master switch; a kind needs
    /// to be installed and enabled for that mode. A kind whose configuration
    /// fails to load is logged and skipped.
    pub fn plan(&self) -> Vec<MonitorPlan> {
        let colour = self.store.colour_channels();
        let installed: Vec<SensorKind> = SensorKind::ALL
            .into_iter()
            .filter(|kind| self.store.is_installed(*kind))
            .collect();
        let mut plans = Vec::new();

        if self.store.is_trigger_recording_enabled() {
            for kind in installed.iter().copied() {
                match self.store.trigger_config(kind) {
                    Ok(config) if config.enabled => plans.push(MonitorPlan {
                        kind,
                        mode: TriggerMode::Variance,
                        columns: kind.columns(colour),
                        config: PlannedConfig::Variance(config),
                    }),
                    Ok(_) => tracing::debug!(kind = %kind, "trigger disabled"),
                    Err(err) => tracing::error!(
                        kind = %kind,
                        error = %err,
                        "failed to load trigger config; monitor not started"
                    ),
                }
            }
        } else {
            tracing::info!("trigger recording disabled; no variance monitors started");
        }

        if self.store.is_high_low_recording_enabled() {
            for kind in installed
                .iter()
                .copied()
                .filter(|kind| !kind.records_unconditionally())
            {
                match self.store.high_low_config(kind) {
                    Ok(config) if config.enabled => plans.push(MonitorPlan {
                        kind,
                        mode: TriggerMode::HighLow,
                        columns: kind.columns(colour),
                        config: PlannedConfig::HighLow(config),
                    }),
                    Ok(_) => tracing::debug!(kind = %kind, "high/low trigger disabled"),
                    Err(err) => tracing::error!(
                        kind = %kind,
                        error = %err,
                        "failed to load high/low trigger config; monitor not started"
                    ),
                }
            }
        } else {
            tracing::debug!("high/low trigger recording disabled");
        }
        plans
    }

    pub fn start(self, cancel: CancellationToken) -> SupervisorHandle {
        let plans = self.plan();
        let launched: Vec<MonitorKey> = plans.iter().map(MonitorPlan::key).collect();
        let slots: HashMap<MonitorKey, MonitorSlot> = plans
            .into_iter()
            .map(|plan| {
                let updates = match plan.config {
                    PlannedConfig::Variance(config) => {
                        SlotUpdates::Variance(watch::Sender::new(config))
                    }
                    PlannedConfig::HighLow(config) => {
                        SlotUpdates::HighLow(watch::Sender::new(config))
                    }
                };
                (
                    MonitorKey::new(plan.kind, plan.mode),
                    MonitorSlot {
                        columns: plan.columns,
                        updates,
                    },
                )
            })
            .collect();
        let slots: Slots = Arc::new(slots);

        tracing::info!(
            monitors = launched.len(),
            keys = ?launched,
            "starting trigger monitors"
        );
        let restart_backoff = self.restart_backoff;
        let launch_slots = Arc::clone(&slots);
        let launch = move |key: MonitorKey, cancel: CancellationToken| {
            self.launch(&launch_slots, key, cancel)
        };
        let task = tokio::spawn(supervise(launched.clone(), launch, restart_backoff, cancel));
        SupervisorHandle {
            launched,
            slots,
            task,
        }
    }

    /// Builds the monitor for `key` from the latest snapshot in its slot.
    fn launch(
        &self,
        slots: &HashMap<MonitorKey, MonitorSlot>,
        key: MonitorKey,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, MonitorExit> {
        let Some(slot) = slots.get(&key) else {
            return futures::future::ready(MonitorExit::Disabled).boxed();
        };
        match &slot.updates {
            SlotUpdates::Variance(updates) => VarianceMonitor::new(
                key.kind,
                slot.columns,
                updates.borrow().clone(),
                Arc::clone(&self.reader),
                Arc::clone(&self.sink),
            )
            .with_identity(self.identity.clone())
            .with_settings(self.settings.clone())
            .with_updates(updates.subscribe())
            .run(cancel)
            .boxed(),
            SlotUpdates::HighLow(updates) => HighLowMonitor::new(
                key.kind,
                slot.columns,
                updates.borrow().clone(),
                Arc::clone(&self.reader),
                Arc::clone(&self.sink),
            )
            .with_identity(self.identity.clone())
            .with_settings(self.settings.clone())
            .with_updates(updates.subscribe())
            .run(cancel)
            .boxed(),
        }
    }
}

/// Runs one task per key until cancelled or until every task has returned.
/// A task that panics is launched again after `restart_backoff`; a task that
/// returns is not.
pub(crate) async fn supervise<L, Fut>(
    keys: Vec<MonitorKey>,
    launch: L,
    restart_backoff: Duration,
    cancel: CancellationToken,
) where
    L: Fn(MonitorKey, CancellationToken) -> Fut,
    Fut: Future<Output = MonitorExit> + Send + 'static,
{
    let mut tasks: JoinSet<MonitorExit> = JoinSet::new();
    let mut running: HashMap<Id, MonitorKey> = HashMap::new();
    for key in keys {
        let handle = tasks.spawn(launch(key, cancel.clone()));
        running.insert(handle.id(), key);
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            joined = tasks.join_next_with_id() => {
                let Some(joined) = joined else { break };
                match joined {
                    Ok((id, exit)) => {
                        let key = running.remove(&id);
                        if let (Some(key), MonitorExit::Disabled) = (key, exit) {
                            tracing::info!(monitor = %key, "trigger monitor disabled");
                        }
                    }
                    Err(err) => {
                        let Some(key) = running.remove(&err.id()) else {
                            tracing::error!(error = %err, "untracked trigger monitor task failed");
                            continue;
                        };
                        if err.is_cancelled() {
                            tracing::warn!(monitor = %key, "trigger monitor task aborted");
                            continue;
                        }
                        let reason = if err.is_panic() {
                            panic_message(&*err.into_panic())
                        } else {
                            err.to_string()
                        };
                        tracing::error!(
                            monitor = %key,
                            panic = %reason,
                            restart_backoff = ?restart_backoff,
                            "trigger monitor died; restarting"
                        );
                        let relaunch = launch(key, cancel.clone());
                        let delay_cancel = cancel.clone();
                        let handle = tasks.spawn(async move {
                            if !idle(&delay_cancel, restart_backoff).await {
                                return MonitorExit::Cancelled;
                            }
                            relaunch.await
                        });
                        running.insert(handle.id(), key);
                    }
                }
            }
        }
    }

    while let Some(joined) = tasks.join_next_with_id().await {
        if let Err(err) = joined {
            tracing::warn!(
                monitor = ?running.get(&err.id()),
                error = %err,
                "trigger monitor task failed during shutdown"
            );
        }
    }
    tracing::info!("trigger monitors stopped");
}

pub struct SupervisorHandle {
    launched: Vec<MonitorKey>,
    slots: Slots,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    pub fn launched(&self) -> &[MonitorKey] {
        &self.launched
    }

    /// Hands a running variance monitor a new configuration snapshot. It is
    /// validated against the monitor's channel layout and takes effect at the
    /// start of the monitor's next cycle.
    pub fn reconfigure(&self, kind: SensorKind, config: TriggerConfig) -> Result<(), ConfigError> {
        let slot = self.slot(MonitorKey::new(kind, TriggerMode::Variance))?;
        config.validate(kind, slot.columns.len())?;
        match &slot.updates {
            SlotUpdates::Variance(updates) => {
                updates.send_replace(config);
                Ok(())
            }
            SlotUpdates::HighLow(_) => Err(not_running(kind)),
        }
    }

    /// Same as [`SupervisorHandle::reconfigure`] for a high/low monitor.
    pub fn reconfigure_high_low(
        &self,
        kind: SensorKind,
        config: HighLowConfig,
    ) -> Result<(), ConfigError> {
        let slot = self.slot(MonitorKey::new(kind, TriggerMode::HighLow))?;
        config.validate(kind, slot.columns.len())?;
        match &slot.updates {
            SlotUpdates::HighLow(updates) => {
                updates.send_replace(config);
                Ok(())
            }
            SlotUpdates::Variance(_) => Err(not_running(kind)),
        }
    }

    fn slot(&self, key: MonitorKey) -> Result<&MonitorSlot, ConfigError> {
        self.slots.get(&key).ok_or_else(|| not_running(key.kind))
    }

    /// Waits for every monitor to stop. Returns once the cancel token fires
    /// or every monitor has been disabled.
    pub async fn join(self) {
        if let Err(err) = self.task.await {
            tracing::error!(error = %err, "trigger supervisor task failed");
        }
    }
}

fn not_running(kind: SensorKind) -> ConfigError {
    ConfigError::Unavailable {
        kind,
        message: "no trigger monitor running".to_string(),
    }
}
