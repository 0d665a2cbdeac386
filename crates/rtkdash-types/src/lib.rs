//! `rtkdash-types` – shared vocabulary for the dashboard workspace.
//!
//! Every telemetry field a device can publish is a variant of [`Field`]; the
//! set a running instance actually carries is fixed at startup by its
//! [`DeviceProfile`] (role plus optional power module). Nothing here is
//! mutable state – the store, broadcaster and renderer crates build on these
//! types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ────────────────────────────────────────────────────────────────────────────
// Roles and field groups
// ────────────────────────────────────────────────────────────────────────────

/// The single role a device instance serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Fixed base station streaming corrections to the rover.
    BaseStation,
    /// Moving rover receiving corrections.
    #[default]
    Rover,
}

impl Role {
    /// The field group owned by this role.
    pub fn group(self) -> FieldGroup {
        match self {
            Role::BaseStation => FieldGroup::BaseStation,
            Role::Rover => FieldGroup::Rover,
        }
    }

    /// Short human label shown on the home page.
    pub fn label(self) -> &'static str {
        match self {
            Role::BaseStation => "Base",
            Role::Rover => "Rover",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::BaseStation => write!(f, "base_station"),
            Role::Rover => write!(f, "rover"),
        }
    }
}

impl FromStr for Role {
    type Err = DashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "base_station" | "base" | "basestation" => Ok(Role::BaseStation),
            "rover" => Ok(Role::Rover),
            other => Err(DashError::Config(format!("unknown role '{other}'"))),
        }
    }
}

/// A fixed family of fields that travel together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldGroup {
    BaseStation,
    Rover,
    /// TinkerCharge power-management board.
    Power,
}

impl FieldGroup {
    /// Fields belonging to this group, in display order.
    pub fn fields(self) -> &'static [Field] {
        use Field::*;
        match self {
            FieldGroup::BaseStation => &[UpTime, NumUploads],
            FieldGroup::Rover => &[
                Latitude, Longitude, RtkMode, GnssDate, GnssTime, UpTime, Fix, RtkAge, RtkRatio,
                CsGps, CsBds, CsGal, RtkEast, RtkNorth, RtkUp,
            ],
            FieldGroup::Power => &[
                Voltage,
                AvgVoltage,
                Current,
                AvgCurrent,
                BatterySoc,
                BatteryCapacity,
                TcTemp,
                UpTime,
            ],
        }
    }
}

/// What a running instance is: its role and whether a power board is fitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub role: Role,
    pub power_module: bool,
}

impl DeviceProfile {
    pub fn new(role: Role, power_module: bool) -> Self {
        Self { role, power_module }
    }

    /// Groups carried by this profile.
    pub fn groups(&self) -> Vec<FieldGroup> {
        let mut groups = vec![self.role.group()];
        if self.power_module {
            groups.push(FieldGroup::Power);
        }
        groups
    }

    /// The fixed field set of this profile, each field exactly once, in
    /// [`Field::ALL`] order.
    pub fn fields(&self) -> Vec<Field> {
        Field::ALL
            .iter()
            .copied()
            .filter(|f| self.contains(*f))
            .collect()
    }

    /// Whether `field` belongs to this profile.
    pub fn contains(&self, field: Field) -> bool {
        let carried = self.groups();
        field.groups().iter().any(|g| carried.contains(g))
    }

    /// Whether this profile carries a position fix.
    pub fn has_position(&self) -> bool {
        self.contains(Field::Latitude) && self.contains(Field::Longitude)
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::new(Role::default(), true)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Fields
// ────────────────────────────────────────────────────────────────────────────

/// Semantic type of a field, which also fixes its text formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Base-10 integer.
    Integer,
    /// Floating point rendered with a fixed number of decimal places.
    Decimal { places: usize },
    /// Short label, rendered verbatim.
    Text,
}

impl FieldKind {
    fn describe(self) -> &'static str {
        match self {
            FieldKind::Integer => "integer",
            FieldKind::Decimal { .. } => "decimal",
            FieldKind::Text => "text",
        }
    }
}

/// Every telemetry field known to the dashboard.
///
/// [`Field::name`] is both the streaming event name and the element id used
/// by the pages; [`Field::placeholder`] is the upper-case template token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Field {
    UpTime,
    NumUploads,
    Latitude,
    Longitude,
    RtkMode,
    GnssDate,
    GnssTime,
    Fix,
    RtkAge,
    RtkRatio,
    CsGps,
    CsBds,
    CsGal,
    RtkEast,
    RtkNorth,
    RtkUp,
    Voltage,
    AvgVoltage,
    Current,
    AvgCurrent,
    BatterySoc,
    BatteryCapacity,
    TcTemp,
}

/// Legacy placeholder tokens used by older power-board pages.
const PLACEHOLDER_ALIASES: &[(&str, Field)] = &[
    ("BATT_CHARGE", Field::BatterySoc),
    ("BATT_CAPACITY", Field::BatteryCapacity),
    ("TEMPERATURE", Field::TcTemp),
];

impl Field {
    pub const ALL: [Field; 23] = [
        Field::UpTime,
        Field::NumUploads,
        Field::Latitude,
        Field::Longitude,
        Field::RtkMode,
        Field::GnssDate,
        Field::GnssTime,
        Field::Fix,
        Field::RtkAge,
        Field::RtkRatio,
        Field::CsGps,
        Field::CsBds,
        Field::CsGal,
        Field::RtkEast,
        Field::RtkNorth,
        Field::RtkUp,
        Field::Voltage,
        Field::AvgVoltage,
        Field::Current,
        Field::AvgCurrent,
        Field::BatterySoc,
        Field::BatteryCapacity,
        Field::TcTemp,
    ];

    /// Wire name, used for streaming events and `set` lookups.
    pub fn name(self) -> &'static str {
        match self {
            Field::UpTime => "up_time",
            Field::NumUploads => "num_uploads",
            // Spelling matches the deployed pages.
            Field::Latitude => "lattitude",
            Field::Longitude => "longitude",
            Field::RtkMode => "rtk_mode",
            Field::GnssDate => "gnss_date",
            Field::GnssTime => "gnss_time",
            Field::Fix => "fix",
            Field::RtkAge => "rtk_age",
            Field::RtkRatio => "rtk_ratio",
            Field::CsGps => "cs_gps",
            Field::CsBds => "cs_bds",
            Field::CsGal => "cs_gal",
            Field::RtkEast => "rtk_east",
            Field::RtkNorth => "rtk_north",
            Field::RtkUp => "rtk_up",
            Field::Voltage => "voltage",
            Field::AvgVoltage => "avg_voltage",
            Field::Current => "current",
            Field::AvgCurrent => "avg_current",
            Field::BatterySoc => "battery_soc",
            Field::BatteryCapacity => "battery_capacity",
            Field::TcTemp => "tc_temp",
        }
    }

    /// Template token (without the `%` delimiters).
    pub fn placeholder(self) -> String {
        self.name().to_ascii_uppercase()
    }

    pub fn kind(self) -> FieldKind {
        match self {
            Field::UpTime
            | Field::NumUploads
            | Field::RtkAge
            | Field::CsGps
            | Field::CsBds
            | Field::CsGal
            | Field::BatteryCapacity => FieldKind::Integer,
            Field::Latitude | Field::Longitude => FieldKind::Decimal { places: 6 },
            Field::RtkEast | Field::RtkNorth | Field::RtkUp => FieldKind::Decimal { places: 3 },
            Field::Voltage | Field::AvgVoltage => FieldKind::Decimal { places: 2 },
            Field::RtkRatio
            | Field::Current
            | Field::AvgCurrent
            | Field::BatterySoc
            | Field::TcTemp => FieldKind::Decimal { places: 1 },
            Field::RtkMode | Field::GnssDate | Field::GnssTime | Field::Fix => FieldKind::Text,
        }
    }

    /// Groups that carry this field. `up_time` is shared by all of them.
    pub fn groups(self) -> &'static [FieldGroup] {
        match self {
            Field::UpTime => &[FieldGroup::BaseStation, FieldGroup::Rover, FieldGroup::Power],
            Field::NumUploads => &[FieldGroup::BaseStation],
            Field::Voltage
            | Field::AvgVoltage
            | Field::Current
            | Field::AvgCurrent
            | Field::BatterySoc
            | Field::BatteryCapacity
            | Field::TcTemp => &[FieldGroup::Power],
            _ => &[FieldGroup::Rover],
        }
    }

    pub fn from_name(name: &str) -> Option<Field> {
        Field::ALL.iter().copied().find(|f| f.name() == name)
    }

    /// Resolve a template token, including the legacy power-page aliases.
    pub fn from_placeholder(token: &str) -> Option<Field> {
        Field::ALL
            .iter()
            .copied()
            .find(|f| token == f.placeholder())
            .or_else(|| {
                PLACEHOLDER_ALIASES
                    .iter()
                    .find(|(alias, _)| *alias == token)
                    .map(|(_, f)| *f)
            })
    }

    /// Value reported before any producer has written the field.
    pub fn default_value(self) -> FieldValue {
        match self {
            Field::RtkMode => FieldValue::Text("N/A".to_string()),
            Field::Fix => FieldValue::Text("NONE".to_string()),
            Field::GnssDate | Field::GnssTime => FieldValue::Text("--".to_string()),
            _ => match self.kind() {
                FieldKind::Integer => FieldValue::Integer(0),
                FieldKind::Decimal { .. } => FieldValue::Decimal(0.0),
                FieldKind::Text => FieldValue::Text(String::new()),
            },
        }
    }

    /// Render `value` with this field's fixed formatting.
    ///
    /// The renderer, the streaming payloads and `/loc` all go through this
    /// function, so a value always reads the same on every surface.
    pub fn format(self, value: &FieldValue) -> String {
        match (self.kind(), value) {
            (FieldKind::Decimal { places }, FieldValue::Decimal(v)) => format!("{v:.places$}"),
            (FieldKind::Decimal { places }, FieldValue::Integer(v)) => {
                format!("{:.places$}", *v as f64)
            }
            (FieldKind::Integer, FieldValue::Decimal(v)) => format!("{v:.0}"),
            (_, FieldValue::Integer(v)) => v.to_string(),
            (_, FieldValue::Decimal(v)) => v.to_string(),
            (_, FieldValue::Text(s)) => s.clone(),
        }
    }

    /// Check `value` against this field's kind, widening integers written to
    /// decimal fields.
    pub fn coerce(self, value: FieldValue) -> Result<FieldValue, DashError> {
        match (self.kind(), value) {
            (FieldKind::Integer, v @ FieldValue::Integer(_)) => Ok(v),
            (FieldKind::Decimal { .. }, FieldValue::Decimal(v)) if !v.is_finite() => {
                Err(DashError::InvalidValue {
                    field: self.name().to_string(),
                    reason: format!("non-finite value {v}"),
                })
            }
            (FieldKind::Decimal { .. }, v @ FieldValue::Decimal(_)) => Ok(v),
            (FieldKind::Decimal { .. }, FieldValue::Integer(v)) => Ok(FieldValue::Decimal(v as f64)),
            (FieldKind::Text, v @ FieldValue::Text(_)) => Ok(v),
            (kind, v) => Err(DashError::TypeMismatch {
                field: self.name().to_string(),
                expected: kind.describe().to_string(),
                found: v.kind_name().to_string(),
            }),
        }
    }

    /// Parse a raw producer string according to this field's kind.
    pub fn parse(self, raw: &str) -> Result<FieldValue, DashError> {
        let raw = raw.trim();
        let invalid = |reason: String| DashError::InvalidValue {
            field: self.name().to_string(),
            reason,
        };
        match self.kind() {
            FieldKind::Integer => raw
                .parse::<i64>()
                .map(FieldValue::Integer)
                .map_err(|e| invalid(format!("'{raw}': {e}"))),
            FieldKind::Decimal { .. } => raw
                .parse::<f64>()
                .map_err(|e| invalid(format!("'{raw}': {e}")))
                .and_then(|v| self.coerce(FieldValue::Decimal(v))),
            FieldKind::Text => Ok(FieldValue::Text(raw.to_string())),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Field {
    type Err = DashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::from_name(s).ok_or_else(|| DashError::UnknownField(s.to_string()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Values and change notifications
// ────────────────────────────────────────────────────────────────────────────

/// A stored field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Decimal(f64),
    Text(String),
}

impl FieldValue {
    fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Integer(_) => "integer",
            FieldValue::Decimal(_) => "decimal",
            FieldValue::Text(_) => "text",
        }
    }
}

macro_rules! field_value_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for FieldValue {
            fn from(v: $t) -> Self {
                FieldValue::Integer(i64::from(v))
            }
        })*
    };
}

field_value_from_int!(i64, i32, i16, u32, u16, u8);

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::Integer(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Decimal(v)
    }
}

impl From<f32> for FieldValue {
    fn from(v: f32) -> Self {
        FieldValue::Decimal(f64::from(v))
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

/// One accepted write to a field, as handed to a [`ChangeSink`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: Field,
    pub value: FieldValue,
    /// `value` rendered with [`Field::format`].
    pub formatted: String,
    pub at: DateTime<Utc>,
}

/// Receiver of field writes.
///
/// The store calls [`ChangeSink::field_changed`] while it still holds the
/// written field's lock, so implementations must not block and must not call
/// back into the store.
pub trait ChangeSink: Send + Sync {
    fn field_changed(&self, change: &FieldChange);
}

// ────────────────────────────────────────────────────────────────────────────
// Satellites
// ────────────────────────────────────────────────────────────────────────────

/// GNSS constellations shown in the satellite table, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Constellation {
    #[serde(rename = "GPS")]
    Gps,
    #[serde(rename = "Galileo")]
    Galileo,
    #[serde(rename = "BeiDou")]
    BeiDou,
}

impl Constellation {
    pub fn label(self) -> &'static str {
        match self {
            Constellation::Gps => "GPS",
            Constellation::Galileo => "Galileo",
            Constellation::BeiDou => "BeiDou",
        }
    }
}

impl fmt::Display for Constellation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Constellation {
    type Err = DashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GPS" | "GP" => Ok(Constellation::Gps),
            "GALILEO" | "GAL" | "GA" => Ok(Constellation::Galileo),
            "BEIDOU" | "BDS" | "BD" | "GB" => Ok(Constellation::BeiDou),
            other => Err(DashError::InvalidValue {
                field: "constellation".to_string(),
                reason: format!("unknown constellation '{other}'"),
            }),
        }
    }
}

/// One tracked satellite, keyed by `(constellation, prn)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatelliteEntry {
    pub constellation: Constellation,
    pub prn: u16,
    pub azimuth_deg: u16,
    pub elevation_deg: u8,
    /// `None` while the satellite is in view but not tracked.
    pub snr_dbhz: Option<u8>,
}

impl SatelliteEntry {
    pub fn key(&self) -> (Constellation, u16) {
        (self.constellation, self.prn)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Error type shared by every crate in the workspace.
///
/// None of these are fatal: callers log them and carry on with the next
/// field, client, or request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DashError {
    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Field {field} is not carried by role {role}")]
    FieldNotInRole { field: String, role: Role },

    #[error("Type mismatch on {field}: expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
