// One poll of the boiler: acquisition time plus every monitored reading.

use serde::{Deserialize, Serialize};

/// How a reading is typed in storage and on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Tri-state flag: 0/1/empty in flat storage.
    Flag,
    Float,
    /// Cumulative integer counter.
    Counter,
}

/// Reading columns in flat-file order (after `timestamp`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Active,
    Modulation,
    Hours,
    Starts,
    TempOut,
    TempBoiler,
    TempHotwater,
    TempHotwaterTarget,
    TempHeating,
    TempSolcollector,
    TempSolstorage,
    SolarProduction,
    SolarPump,
    CirculationPump,
    DhwPump,
}

impl Field {
    pub const ALL: [Field; 15] = [
        Field::Active,
        Field::Modulation,
        Field::Hours,
        Field::Starts,
        Field::TempOut,
        Field::TempBoiler,
        Field::TempHotwater,
        Field::TempHotwaterTarget,
        Field::TempHeating,
        Field::TempSolcollector,
        Field::TempSolstorage,
        Field::SolarProduction,
        Field::SolarPump,
        Field::CirculationPump,
        Field::DhwPump,
    ];

    /// Column / variable name, identical in SQLite, flat files and the series API.
    pub fn name(self) -> &'static str {
        match self {
            Field::Active => "active",
            Field::Modulation => "modulation",
            Field::Hours => "hours",
            Field::Starts => "starts",
            Field::TempOut => "temp_out",
            Field::TempBoiler => "temp_boiler",
            Field::TempHotwater => "temp_hotwater",
            Field::TempHotwaterTarget => "temp_hotwater_target",
            Field::TempHeating => "temp_heating",
            Field::TempSolcollector => "temp_solcollector",
            Field::TempSolstorage => "temp_solstorage",
            Field::SolarProduction => "solar_production",
            Field::SolarPump => "solar_pump",
            Field::CirculationPump => "circulation_pump",
            Field::DhwPump => "dhw_pump",
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            Field::Active | Field::SolarPump | Field::CirculationPump | Field::DhwPump => {
                FieldKind::Flag
            }
            Field::Starts => FieldKind::Counter,
            _ => FieldKind::Float,
        }
    }
}

/// Immutable once built. `None` means the device did not report the value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Seconds since epoch at acquisition. Not unique, not necessarily monotonic.
    pub timestamp: i64,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub modulation: Option<f64>,
    #[serde(default)]
    pub hours: Option<f64>,
    #[serde(default)]
    pub starts: Option<i64>,
    #[serde(default)]
    pub temp_out: Option<f64>,
    #[serde(default)]
    pub temp_boiler: Option<f64>,
    #[serde(default)]
    pub temp_hotwater: Option<f64>,
    #[serde(default)]
    pub temp_hotwater_target: Option<f64>,
    #[serde(default)]
    pub temp_heating: Option<f64>,
    #[serde(default)]
    pub temp_solcollector: Option<f64>,
    #[serde(default)]
    pub temp_solstorage: Option<f64>,
    #[serde(default)]
    pub solar_production: Option<f64>,
    #[serde(default)]
    pub solar_pump: Option<bool>,
    #[serde(default)]
    pub circulation_pump: Option<bool>,
    #[serde(default)]
    pub dhw_pump: Option<bool>,
}

fn flag(v: Option<bool>) -> Option<f64> {
    v.map(|b| if b { 1.0 } else { 0.0 })
}

impl Snapshot {
    /// Snapshot with a timestamp and no readings (a fully failed partial read).
    pub fn empty(timestamp: i64) -> Self {
        Self {
            timestamp,
            ..Self::default()
        }
    }

    /// Numeric view of one reading; flags map to 0.0 / 1.0.
    pub fn value(&self, field: Field) -> Option<f64> {
        match field {
            Field::Active => flag(self.active),
            Field::Modulation => self.modulation,
            Field::Hours => self.hours,
            Field::Starts => self.starts.map(|s| s as f64),
            Field::TempOut => self.temp_out,
            Field::TempBoiler => self.temp_boiler,
            Field::TempHotwater => self.temp_hotwater,
            Field::TempHotwaterTarget => self.temp_hotwater_target,
            Field::TempHeating => self.temp_heating,
            Field::TempSolcollector => self.temp_solcollector,
            Field::TempSolstorage => self.temp_solstorage,
            Field::SolarProduction => self.solar_production,
            Field::SolarPump => flag(self.solar_pump),
            Field::CirculationPump => flag(self.circulation_pump),
            Field::DhwPump => flag(self.dhw_pump),
        }
    }

    /// Inverse of [`Snapshot::value`]. Flags are true for any non-zero value,
    /// counters are truncated.
    pub fn set_value(&mut self, field: Field, value: Option<f64>) {
        let as_flag = value.map(|v| v != 0.0);
        match field {
            Field::Active => self.active = as_flag,
            Field::Modulation => self.modulation = value,
            Field::Hours => self.hours = value,
            Field::Starts => self.starts = value.map(|v| v as i64),
            Field::TempOut => self.temp_out = value,
            Field::TempBoiler => self.temp_boiler = value,
            Field::TempHotwater => self.temp_hotwater = value,
            Field::TempHotwaterTarget => self.temp_hotwater_target = value,
            Field::TempHeating => self.temp_heating = value,
            Field::TempSolcollector => self.temp_solcollector = value,
            Field::TempSolstorage => self.temp_solstorage = value,
            Field::SolarProduction => self.solar_production = value,
            Field::SolarPump => self.solar_pump = as_flag,
            Field::CirculationPump => self.circulation_pump = as_flag,
            Field::DhwPump => self.dhw_pump = as_flag,
        }
    }

    /// True when no reading at all is present.
    pub fn is_partial_empty(&self) -> bool {
        Field::ALL.into_iter().all(|f| self.value(f).is_none())
    }

    /// Number of readings the device actually delivered.
    pub fn present_count(&self) -> usize {
        Field::ALL
            .into_iter()
            .filter(|f| self.value(*f).is_some())
            .count()
    }
}
