//! `rtkdash-store` – the device's live state.
//!
//! Holds the latest value of every telemetry field for the instance's
//! [`DeviceProfile`][rtkdash_types::DeviceProfile], plus the satellite table.
//!
//! # Modules
//!
//! - [`telemetry`] – [`TelemetryStore`][telemetry::TelemetryStore]: fixed
//!   field set with per-field locking, change sinks notified on every write,
//!   and point-in-time [`TelemetrySnapshot`][telemetry::TelemetrySnapshot]s
//!   for rendering.
//! - [`satellites`] – [`SatelliteTable`][satellites::SatelliteTable]:
//!   satellites in view merged by `(constellation, PRN)`.

pub mod satellites;
pub mod telemetry;

pub use satellites::SatelliteTable;
pub use telemetry::{TelemetryReading, TelemetrySnapshot, TelemetryStore};
