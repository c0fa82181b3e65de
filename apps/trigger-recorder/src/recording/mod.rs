pub mod auto_wait;
pub mod high_low;
pub mod monitor;
pub mod sampler;
pub mod supervisor;
pub mod variance;

pub use high_low::{BandTracker, HighLowMonitor, TriggerState};
pub use monitor::{CycleOutcome, MonitorExit, MonitorSettings, VarianceMonitor};
pub use supervisor::{MonitorKey, MonitorPlan, RecordingSupervisor, SupervisorHandle, TriggerMode};
pub use variance::{evaluate, exceeds_variance, Variance, VarianceDecision};
