use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "trigger-recorder",
    version,
    about = "Records sensor readings to SQLite when they change beyond their configured variance"
)]
pub struct Args {
    /// JSON settings file (installed sensors + per-kind triggers).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// SQLite database receiving TriggerData rows.
    #[arg(long)]
    pub database: Option<PathBuf>,
    /// Print the effective settings (every kind, defaults filled in) and exit.
    #[arg(long, default_value_t = false)]
    pub print_config: bool,
    /// Time reads of every installed sensor and print suggested wait intervals.
    #[arg(long, default_value_t = false)]
    pub measure_latency: bool,
    #[arg(long, default_value_t = 10.0)]
    pub latency_multiplier: f64,
    /// Skip the per-kind minimum wait floors when suggesting intervals.
    #[arg(long, default_value_t = false)]
    pub set_lowest: bool,
}
