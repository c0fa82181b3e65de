use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DATETIME_COLUMN: &str = "DateTime";
pub const SENSOR_NAME_COLUMN: &str = "SensorName";
pub const IP_COLUMN: &str = "IP";
pub const TRIGGER_KIND_COLUMN: &str = "TriggerKind";
pub const TRIGGER_STATE_COLUMN: &str = "TriggerState";

const COLOUR_SPECTRAL_COLUMNS: [&str; 6] = ["Red", "Orange", "Yellow", "Green", "Blue", "Violet"];
const COLOUR_RGB_COLUMNS: [&str; 3] = ["Red", "Green", "Blue"];

/// Positions of red, green and blue inside the six-channel spectral layout.
pub const RGB_FROM_SPECTRAL: [usize; 3] = [0, 3, 4];

/// Colour sensors either report plain RGB or the six-band visible spectrum (AS7262).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColourChannels {
    #[default]
    Rgb,
    Spectral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    SensorUptime,
    CpuTemperature,
    EnvTemperature,
    Pressure,
    Altitude,
    Humidity,
    Distance,
    Gas,
    ParticulateMatter,
    Lumen,
    Colour,
    UltraViolet,
    Accelerometer,
    Magnetometer,
    Gyroscope,
}

impl SensorKind {
    pub const ALL: [SensorKind; 15] = [
        SensorKind::SensorUptime,
        SensorKind::CpuTemperature,
        SensorKind::EnvTemperature,
        SensorKind::Pressure,
        SensorKind::Altitude,
        SensorKind::Humidity,
        SensorKind::Distance,
        SensorKind::Gas,
        SensorKind::ParticulateMatter,
        SensorKind::Lumen,
        SensorKind::Colour,
        SensorKind::UltraViolet,
        SensorKind::Accelerometer,
        SensorKind::Magnetometer,
        SensorKind::Gyroscope,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SensorKind::SensorUptime => "sensor_uptime",
            SensorKind::CpuTemperature => "cpu_temperature",
            SensorKind::EnvTemperature => "env_temperature",
            SensorKind::Pressure => "pressure",
            SensorKind::Altitude => "altitude",
            SensorKind::Humidity => "humidity",
            SensorKind::Distance => "distance",
            SensorKind::Gas => "gas",
            SensorKind::ParticulateMatter => "particulate_matter",
            SensorKind::Lumen => "lumen",
            SensorKind::Colour => "colour",
            SensorKind::UltraViolet => "ultra_violet",
            SensorKind::Accelerometer => "accelerometer",
            SensorKind::Magnetometer => "magnetometer",
            SensorKind::Gyroscope => "gyroscope",
        }
    }

    /// Column layout of this kind's trigger rows, in channel order.
    pub fn columns(self, colour: ColourChannels) -> &'static [&'static str] {
        match self {
            SensorKind::SensorUptime => &["SensorUpTime"],
            SensorKind::CpuTemperature => &["SystemTemp"],
            SensorKind::EnvTemperature => &["EnvironmentTemp"],
            SensorKind::Pressure => &["Pressure"],
            SensorKind::Altitude => &["Altitude"],
            SensorKind::Humidity => &["Humidity"],
            SensorKind::Distance => &["Distance"],
            SensorKind::Gas => &[
                "Gas_Resistance_Index",
                "Gas_Oxidising",
                "Gas_Reducing",
                "Gas_NH3",
            ],
            SensorKind::ParticulateMatter => &[
                "Particulate_Matter_1",
                "Particulate_Matter_2_5",
                "Particulate_Matter_10",
            ],
            SensorKind::Lumen => &["Lumen"],
            SensorKind::Colour => match colour {
                ColourChannels::Rgb => &COLOUR_RGB_COLUMNS,
                ColourChannels::Spectral => &COLOUR_SPECTRAL_COLUMNS,
            },
            SensorKind::UltraViolet => &["Ultra_Violet_Index", "Ultra_Violet_A", "Ultra_Violet_B"],
            SensorKind::Accelerometer => &["Acc_X", "Acc_Y", "Acc_Z"],
            SensorKind::Magnetometer => &["Mag_X", "Mag_Y", "Mag_Z"],
            SensorKind::Gyroscope => &["Gyro_X", "Gyro_Y", "Gyro_Z"],
        }
    }

    pub fn arity(self, colour: ColourChannels) -> usize {
        self.columns(colour).len()
    }

    /// Sensor uptime is written every cycle; it has no variance.
    pub fn records_unconditionally(self) -> bool {
        matches!(self, SensorKind::SensorUptime)
    }

    /// Factory variance per channel. Colour always lists all six spectral bands.
    pub fn default_variance(self) -> &'static [f64] {
        match self {
            SensorKind::SensorUptime => &[],
            SensorKind::CpuTemperature | SensorKind::EnvTemperature => &[5.0],
            SensorKind::Pressure | SensorKind::Altitude => &[10.0],
            SensorKind::Humidity | SensorKind::Distance => &[5.0],
            SensorKind::Gas => &[100.0, 100.0, 100.0, 100.0],
            SensorKind::ParticulateMatter => &[4.0, 4.0, 4.0],
            SensorKind::Lumen => &[100.0],
            SensorKind::Colour => &[15.0, 15.0, 15.0, 15.0, 15.0, 15.0],
            SensorKind::UltraViolet => &[5.0, 10.0, 10.0],
            SensorKind::Accelerometer => &[0.1, 0.1, 0.1],
            SensorKind::Magnetometer | SensorKind::Gyroscope => &[25.0, 25.0, 25.0],
        }
    }

    /// Factory `(low, high)` band per channel for high/low triggers. Colour lists
    /// all six spectral bands. Uptime has no band.
    pub fn default_band(self) -> (&'static [f64], &'static [f64]) {
        match self {
            SensorKind::SensorUptime => (&[], &[]),
            SensorKind::CpuTemperature => (&[10.0], &[75.0]),
            SensorKind::EnvTemperature => (&[-5.0], &[35.0]),
            SensorKind::Pressure => (&[350.0], &[1200.0]),
            SensorKind::Altitude => (&[200.0], &[1000.0]),
            SensorKind::Humidity => (&[25.0], &[80.0]),
            SensorKind::Distance => (&[1.0], &[555.0]),
            SensorKind::Gas => (&[100.0; 4], &[800.0; 4]),
            SensorKind::ParticulateMatter => (&[40.0, 41.0, 41.0], &[114.0, 114.0, 114.0]),
            SensorKind::Lumen => (&[25.0], &[1000.0]),
            SensorKind::Colour => (&[15.0; 6], &[215.0; 6]),
            SensorKind::UltraViolet => (&[25.0, 21.0, 20.0], &[225.0, 210.0, 210.0]),
            SensorKind::Accelerometer => (&[0.1; 3], &[0.9; 3]),
            SensorKind::Magnetometer => (&[40.0; 3], &[60.0; 3]),
            SensorKind::Gyroscope => (&[10.0; 3], &[70.0; 3]),
        }
    }

    pub fn default_high_low_wait_seconds(self) -> f64 {
        match self {
            SensorKind::Distance => 2.0,
            SensorKind::Lumen => 10.0,
            SensorKind::Accelerometer | SensorKind::Magnetometer | SensorKind::Gyroscope => 0.3,
            _ => 60.0,
        }
    }

    pub fn default_wait_seconds(self) -> f64 {
        match self {
            SensorKind::SensorUptime => 1_209_600.0,
            SensorKind::Colour => 10.0,
            SensorKind::UltraViolet => 5.0,
            SensorKind::Gas => 30.0,
            SensorKind::ParticulateMatter => 60.0,
            SensorKind::Accelerometer | SensorKind::Magnetometer | SensorKind::Gyroscope => 0.3,
            _ => 1.0,
        }
    }

    /// Lowest wait the latency auto-tune will suggest unless asked for the raw minimum.
    pub fn min_wait_seconds(self) -> f64 {
        match self {
            SensorKind::SensorUptime => 0.0,
            SensorKind::CpuTemperature | SensorKind::EnvTemperature | SensorKind::Humidity => 15.0,
            SensorKind::Pressure
            | SensorKind::Altitude
            | SensorKind::Gas
            | SensorKind::ParticulateMatter => 30.0,
            SensorKind::Distance
            | SensorKind::Lumen
            | SensorKind::Colour
            | SensorKind::UltraViolet => 1.0,
            SensorKind::Accelerometer | SensorKind::Magnetometer | SensorKind::Gyroscope => 0.25,
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let wanted = raw.trim();
        SensorKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown sensor kind {wanted:?}"))
    }
}

/// Every value column any kind can write, in table order.
pub fn all_value_columns() -> Vec<&'static str> {
    let mut columns: Vec<&'static str> = Vec::new();
    for kind in SensorKind::ALL {
        for column in kind.columns(ColourChannels::Spectral) {
            if !columns.contains(column) {
                columns.push(*column);
            }
        }
    }
    columns
}
