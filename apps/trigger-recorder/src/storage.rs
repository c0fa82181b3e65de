use crate::error::SinkError;
use crate::identity::HostIdentity;
use crate::kind::{
    all_value_columns, SensorKind, DATETIME_COLUMN, IP_COLUMN, SENSOR_NAME_COLUMN,
    TRIGGER_KIND_COLUMN, TRIGGER_STATE_COLUMN,
};
use crate::recording::high_low::TriggerState;
use crate::sensors::Reading;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const TRIGGER_TABLE: &str = "TriggerData";
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
const IDENTITY_INDEX: &str = "TriggerData_identity";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// One persisted trigger sample. Rows are never updated once written.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerRow {
    pub kind: SensorKind,
    pub timestamp: DateTime<Utc>,
    pub sensor_name: Option<String>,
    pub ip: Option<String>,
    /// Set on high/low rows only.
    pub state: Option<TriggerState>,
    pub columns: Vec<&'static str>,
    pub values: Vec<Option<f64>>,
}

impl TriggerRow {
    pub fn new(
        kind: SensorKind,
        timestamp: DateTime<Utc>,
        identity: &HostIdentity,
        columns: &'static [&'static str],
        reading: &Reading,
    ) -> Self {
        Self {
            kind,
            timestamp,
            sensor_name: identity.sensor_name.clone(),
            ip: identity.ip.clone(),
            state: None,
            columns: columns.to_vec(),
            values: (0..columns.len()).map(|idx| reading.channel(idx)).collect(),
        }
    }

    /// A high/low row: the channels that entered `state` this cycle.
    pub fn transition(
        kind: SensorKind,
        timestamp: DateTime<Utc>,
        identity: &HostIdentity,
        state: TriggerState,
        channels: Vec<(&'static str, f64)>,
    ) -> Self {
        let (columns, values) = channels
            .into_iter()
            .map(|(column, value)| (column, Some(value)))
            .unzip();
        Self {
            kind,
            timestamp,
            sensor_name: identity.sensor_name.clone(),
            ip: identity.ip.clone(),
            state: Some(state),
            columns,
            values,
        }
    }

    pub fn datetime_text(&self) -> String {
        self.timestamp.format(DATETIME_FORMAT).to_string()
    }

    pub fn insert_sql(&self) -> String {
        let mut columns = vec![
            DATETIME_COLUMN,
            SENSOR_NAME_COLUMN,
            IP_COLUMN,
            TRIGGER_KIND_COLUMN,
            TRIGGER_STATE_COLUMN,
        ];
        columns.extend(self.columns.iter().copied());
        let names = columns
            .iter()
            .map(|name| format!("\"{name}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=columns.len())
            .map(|idx| format!("?{idx}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("INSERT OR IGNORE INTO {TRIGGER_TABLE} ({names}) VALUES ({placeholders})")
    }

    fn bind_values(&self) -> Vec<Value> {
        let text = |value: &Option<String>| match value {
            Some(value) => Value::Text(value.clone()),
            None => Value::Null,
        };
        let mut values = vec![
            Value::Text(self.datetime_text()),
            text(&self.sensor_name),
            text(&self.ip),
            Value::Text(self.kind.as_str().to_string()),
            match self.state {
                Some(state) => Value::Text(state.as_str().to_string()),
                None => Value::Null,
            },
        ];
        values.extend(self.values.iter().map(|value| match value {
            Some(v) => Value::Real(*v),
            None => Value::Null,
        }));
        values
    }
}

/// Append-only destination for trigger rows. Duplicate rows are dropped silently.
pub trait StorageSink: Send + Sync {
    fn write_row(&self, row: &TriggerRow) -> Result<(), SinkError>;
}

/// SQLite sink. Every write opens its own connection and runs one autonomous
/// statement, so concurrent monitors rely on SQLite's own locking.
#[derive(Debug, Clone)]
pub struct SqliteSink {
    path: PathBuf,
}

impl SqliteSink {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let sink = Self {
            path: path.to_path_buf(),
        };
        let conn = sink
            .connect()
            .with_context(|| format!("failed to open {}", path.display()))?;
        ensure_schema(&conn)?;
        Ok(sink)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }
}

impl StorageSink for SqliteSink {
    fn write_row(&self, row: &TriggerRow) -> Result<(), SinkError> {
        if row.columns.len() != row.values.len() {
            return Err(SinkError::Shape {
                columns: row.columns.len(),
                values: row.values.len(),
            });
        }
        let conn = self.connect()?;
        let inserted = conn.execute(&row.insert_sql(), params_from_iter(row.bind_values()))?;
        if inserted == 0 {
            tracing::debug!(
                kind = %row.kind,
                datetime = %row.datetime_text(),
                "skipped duplicate trigger row"
            );
        }
        Ok(())
    }
}

/// Creates the trigger table, adds any missing columns and the dedupe index.
/// Older databases that only carry some columns are upgraded in place.
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {TRIGGER_TABLE} (\"{DATETIME_COLUMN}\" TEXT)"
    ))
    .context("failed to create trigger table")?;

    let existing: HashSet<String> = {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({TRIGGER_TABLE})"))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        names
    };

    let text_columns = [
        SENSOR_NAME_COLUMN,
        IP_COLUMN,
        TRIGGER_KIND_COLUMN,
        TRIGGER_STATE_COLUMN,
    ]
    .into_iter()
    .map(|name| (name, "TEXT"));
    let value_columns = all_value_columns().into_iter().map(|name| (name, "REAL"));
    for (name, sql_type) in text_columns.chain(value_columns) {
        if existing.contains(name) {
            continue;
        }
        conn.execute_batch(&format!(
            "ALTER TABLE {TRIGGER_TABLE} ADD COLUMN \"{name}\" {sql_type}"
        ))
        .with_context(|| format!("failed to add column {name}"))?;
        tracing::debug!(column = name, "added trigger column");
    }

    let index = format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {IDENTITY_INDEX} ON {TRIGGER_TABLE} (\
         \"{DATETIME_COLUMN}\", IFNULL(\"{SENSOR_NAME_COLUMN}\", ''), \
         IFNULL(\"{IP_COLUMN}\", ''), IFNULL(\"{TRIGGER_KIND_COLUMN}\", ''), \
         IFNULL(\"{TRIGGER_STATE_COLUMN}\", ''))"
    );
    if let Err(err) = conn.execute_batch(&index) {
        tracing::warn!(
            error = %err,
            "failed to create trigger dedupe index; duplicate rows will not be dropped"
        );
    }
    Ok(())
}
