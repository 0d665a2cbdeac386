//! [`SatelliteTable`] – satellites in view, one row per `(constellation, PRN)`.
//!
//! A later report for a satellite already in the table replaces its azimuth,
//! elevation and SNR in place; rows are never duplicated.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rtkdash_types::{Constellation, SatelliteEntry};
use tracing::debug;

type Rows = BTreeMap<(Constellation, u16), SatelliteEntry>;

/// Merged satellite view across GPS, Galileo and BeiDou.
#[derive(Debug, Default)]
pub struct SatelliteTable {
    rows: Mutex<Rows>,
}

impl SatelliteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `entry` or replace the existing row with the same key.
    ///
    /// Returns `true` when the satellite was not in the table before.
    pub fn upsert(&self, entry: SatelliteEntry) -> bool {
        let (constellation, prn) = entry.key();
        let inserted = self.lock().insert((constellation, prn), entry).is_none();
        if inserted {
            debug!(constellation = %constellation, prn, "satellite entered view");
        }
        inserted
    }

    /// Drop a satellite that is no longer in view.
    pub fn remove(&self, constellation: Constellation, prn: u16) -> Option<SatelliteEntry> {
        self.lock().remove(&(constellation, prn))
    }

    /// Drop every row of one constellation, e.g. before applying a complete
    /// fresh sky view for it.
    pub fn clear_constellation(&self, constellation: Constellation) {
        self.lock().retain(|(c, _), _| *c != constellation);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn get(&self, constellation: Constellation, prn: u16) -> Option<SatelliteEntry> {
        self.lock().get(&(constellation, prn)).cloned()
    }

    /// All rows, ordered by constellation then PRN.
    pub fn rows(&self) -> Vec<SatelliteEntry> {
        self.lock().values().cloned().collect()
    }

    /// Rows of a single constellation, ordered by PRN.
    pub fn constellation(&self, constellation: Constellation) -> Vec<SatelliteEntry> {
        self.lock()
            .range((constellation, 0)..=(constellation, u16::MAX))
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Rows> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sat(constellation: Constellation, prn: u16, az: u16, el: u8, snr: Option<u8>) -> SatelliteEntry {
        SatelliteEntry {
            constellation,
            prn,
            azimuth_deg: az,
            elevation_deg: el,
            snr_dbhz: snr,
        }
    }

    #[test]
    fn repeated_report_updates_in_place() {
        let table = SatelliteTable::new();
        assert!(table.upsert(sat(Constellation::Gps, 5, 100, 30, Some(40))));
        assert!(!table.upsert(sat(Constellation::Gps, 5, 102, 31, Some(42))));

        assert_eq!(table.len(), 1);
        let row = table.get(Constellation::Gps, 5).unwrap();
        assert_eq!(row.azimuth_deg, 102);
        assert_eq!(row.elevation_deg, 31);
        assert_eq!(row.snr_dbhz, Some(42));
    }

    #[test]
    fn same_prn_in_different_constellations_are_distinct() {
        let table = SatelliteTable::new();
        table.upsert(sat(Constellation::Gps, 7, 10, 10, None));
        table.upsert(sat(Constellation::BeiDou, 7, 20, 20, None));
        table.upsert(sat(Constellation::Galileo, 7, 30, 30, None));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn rows_are_ordered_by_constellation_then_prn() {
        let table = SatelliteTable::new();
        table.upsert(sat(Constellation::BeiDou, 1, 0, 0, None));
        table.upsert(sat(Constellation::Gps, 12, 0, 0, None));
        table.upsert(sat(Constellation::Gps, 3, 0, 0, None));
        table.upsert(sat(Constellation::Galileo, 30, 0, 0, None));

        let keys: Vec<_> = table.rows().iter().map(SatelliteEntry::key).collect();
        assert_eq!(
            keys,
            vec![
                (Constellation::Gps, 3),
                (Constellation::Gps, 12),
                (Constellation::Galileo, 30),
                (Constellation::BeiDou, 1),
            ]
        );
    }

    #[test]
    fn constellation_filter_and_clear() {
        let table = SatelliteTable::new();
        table.upsert(sat(Constellation::Gps, 1, 0, 0, None));
        table.upsert(sat(Constellation::Gps, 2, 0, 0, None));
        table.upsert(sat(Constellation::Galileo, 1, 0, 0, None));

        assert_eq!(table.constellation(Constellation::Gps).len(), 2);
        table.clear_constellation(Constellation::Gps);
        assert!(table.constellation(Constellation::Gps).is_empty());
        assert_eq!(table.len(), 1);

        assert!(table.remove(Constellation::Galileo, 1).is_some());
        assert!(table.is_empty());
    }
}
