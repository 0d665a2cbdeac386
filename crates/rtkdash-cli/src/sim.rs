//! Simulated GNSS receiver and power board for running without hardware.
//!
//! [`Simulator`] writes plausible values into the store once per step: a
//! rover wandering a few metres around a fixed point with `rtk_age` counting
//! up between corrections, a base station counting uploads, and a slowly
//! discharging battery when a power module is configured.
//!
//! # Example
//!
//! ```rust,ignore
//! let sim = Simulator::new(store.clone(), satellites.clone());
//! tokio::spawn(sim.run(Duration::from_secs(1)));
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rtkdash_store::{SatelliteTable, TelemetryStore};
use rtkdash_types::{Constellation, Field, Role, SatelliteEntry};
use tokio::time::{self, MissedTickBehavior};
use tracing::info;

/// Point the simulated rover circles around.
const ORIGIN: (f64, f64) = (39.281507, -74.558350);

/// Steps between simulated correction messages.
const CORRECTION_PERIOD: u64 = 5;

/// Fixed simulated sky: constellation, PRN, base azimuth, elevation.
const SKY: &[(Constellation, u16, u16, u8)] = &[
    (Constellation::Gps, 2, 40, 62),
    (Constellation::Gps, 5, 135, 28),
    (Constellation::Gps, 12, 210, 45),
    (Constellation::Gps, 25, 300, 17),
    (Constellation::Gps, 29, 355, 71),
    (Constellation::Galileo, 4, 80, 33),
    (Constellation::Galileo, 11, 190, 54),
    (Constellation::Galileo, 19, 260, 12),
    (Constellation::BeiDou, 7, 20, 48),
    (Constellation::BeiDou, 20, 150, 66),
    (Constellation::BeiDou, 33, 275, 22),
];

pub struct Simulator {
    store: Arc<TelemetryStore>,
    satellites: Arc<SatelliteTable>,
    step: u64,
    rtk_age: i64,
    uploads: i64,
    cycle_slips: [i64; 3],
}

impl Simulator {
    pub fn new(store: Arc<TelemetryStore>, satellites: Arc<SatelliteTable>) -> Self {
        Self {
            store,
            satellites,
            step: 0,
            rtk_age: 0,
            uploads: 0,
            cycle_slips: [0; 3],
        }
    }

    /// Step once per `period`, forever.
    pub async fn run(mut self, period: Duration) {
        info!(profile = ?self.store.profile(), period_ms = period.as_millis() as u64, "simulator running");
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.step_at(Utc::now());
        }
    }

    /// Produce one round of readings stamped with `now`.
    pub fn step_at(&mut self, now: DateTime<Utc>) {
        let profile = self.store.profile();
        match profile.role {
            Role::Rover => self.rover(now),
            Role::BaseStation => self.base_station(),
        }
        if profile.power_module {
            self.power();
        }
        self.step += 1;
    }

    fn phase(&self) -> f64 {
        self.step as f64 * 0.05
    }

    fn rover(&mut self, now: DateTime<Utc>) {
        let phase = self.phase();
        let store = &self.store;

        store.set_field(Field::Latitude, ORIGIN.0 + 0.00002 * phase.sin());
        store.set_field(Field::Longitude, ORIGIN.1 + 0.00002 * phase.cos());
        store.set_field(Field::GnssDate, now.format("%Y-%m-%d").to_string());
        store.set_field(Field::GnssTime, now.format("%H:%M:%S").to_string());

        self.rtk_age = if self.step % CORRECTION_PERIOD == 0 {
            0
        } else {
            self.rtk_age + 1
        };
        store.set_field(Field::RtkAge, self.rtk_age);
        let (mode, ratio) = if self.rtk_age <= 2 {
            ("RTK FIXED", 3.0 + (self.step % 10) as f64 * 0.4)
        } else {
            ("RTK FLOAT", 1.2 + (self.step % 10) as f64 * 0.1)
        };
        store.set_field(Field::RtkMode, mode);
        store.set_field(Field::Fix, "3D");
        store.set_field(Field::RtkRatio, ratio);

        for (slips, (field, every)) in self.cycle_slips.iter_mut().zip([
            (Field::CsGps, 17),
            (Field::CsBds, 23),
            (Field::CsGal, 29),
        ]) {
            if self.step > 0 && self.step % every == 0 {
                *slips += 1;
            }
            store.set_field(field, *slips);
        }

        store.set_field(Field::RtkEast, 0.012 * phase.sin());
        store.set_field(Field::RtkNorth, 0.015 * phase.cos());
        store.set_field(Field::RtkUp, 0.004 * (2.0 * phase).sin());

        for &(constellation, prn, azimuth, elevation) in SKY {
            self.satellites.upsert(SatelliteEntry {
                constellation,
                prn,
                azimuth_deg: ((azimuth as u64 + self.step) % 360) as u16,
                elevation_deg: elevation,
                snr_dbhz: Some(30 + ((prn as u64 + self.step) % 15) as u8),
            });
        }
    }

    fn base_station(&mut self) {
        self.uploads += 1;
        self.store.set_field(Field::NumUploads, self.uploads);
    }

    fn power(&mut self) {
        let phase = self.phase();
        let store = &self.store;

        let soc = (100.0 - self.step as f64 * 0.01).max(5.0);
        let avg_voltage = 12.6 - (100.0 - soc) * 0.02;
        store.set_field(Field::BatterySoc, soc);
        store.set_field(Field::BatteryCapacity, 2200);
        store.set_field(Field::AvgVoltage, avg_voltage);
        store.set_field(Field::Voltage, avg_voltage + 0.03 * phase.sin());
        store.set_field(Field::AvgCurrent, 420.0);
        store.set_field(Field::Current, 420.0 + 30.0 * phase.sin());
        store.set_field(Field::TcTemp, 31.0 + 1.5 * (phase / 4.0).sin());
    }
}
