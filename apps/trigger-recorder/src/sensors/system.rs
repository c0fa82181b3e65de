use super::{Reading, SensorReader};
use crate::error::SensorError;
use crate::kind::SensorKind;
use std::sync::Mutex;
use sysinfo::{Components, System};

const CPU_LABEL_HINTS: [&str; 5] = ["cpu", "package", "soc", "core", "thermal"];

/// Host-level readings available on any Linux board without extra hardware:
/// CPU temperature from the thermal zones and system uptime.
pub struct SystemSensors {
    components: Mutex<Components>,
}

impl SystemSensors {
    pub fn new() -> Self {
        Self {
            components: Mutex::new(Components::new_with_refreshed_list()),
        }
    }

    fn cpu_temperature(&self) -> Result<Reading, SensorError> {
        let kind = SensorKind::CpuTemperature;
        let mut components = self
            .components
            .lock()
            .map_err(|_| SensorError::driver(kind, "component list lock poisoned"))?;
        components.refresh(false);

        let preferred = components.iter().find(|component| {
            let label = component.label().to_ascii_lowercase();
            component.temperature().is_some()
                && CPU_LABEL_HINTS.iter().any(|hint| label.contains(hint))
        });
        let component = preferred
            .or_else(|| components.iter().find(|c| c.temperature().is_some()))
            .ok_or(SensorError::NotPresent(kind))?;

        let celsius = component
            .temperature()
            .ok_or_else(|| SensorError::driver(kind, "temperature unavailable"))?;
        Ok(Reading::scalar(f64::from(celsius)))
    }
}

impl Default for SystemSensors {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorReader for SystemSensors {
    fn read(&self, kind: SensorKind) -> Result<Reading, SensorError> {
        match kind {
            SensorKind::SensorUptime => Ok(Reading::scalar(System::uptime() as f64 / 60.0)),
            SensorKind::CpuTemperature => self.cpu_temperature(),
            other => Err(SensorError::NotPresent(other)),
        }
    }
}
