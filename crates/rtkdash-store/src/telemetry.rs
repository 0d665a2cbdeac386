//! [`TelemetryStore`] – latest value of every field for one device profile.
//!
//! The field map is built once in [`TelemetryStore::new`] and never grows or
//! shrinks. Each field sits behind its own mutex, so producers writing
//! unrelated fields never contend with each other and a reader can never see
//! a half-written value.
//!
//! Every accepted write is forwarded to the registered [`ChangeSink`]s while
//! the field's lock is held; two writes to the same field therefore reach the
//! sinks in the order they were applied.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rtkdash_types::{ChangeSink, DashError, DeviceProfile, Field, FieldChange, FieldValue};
use tracing::{debug, warn};

// ────────────────────────────────────────────────────────────────────────────
// Readings and snapshots
// ────────────────────────────────────────────────────────────────────────────

/// A field's current value and when it was last written.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryReading {
    pub value: FieldValue,
    /// `None` until a producer writes the field.
    pub updated_at: Option<DateTime<Utc>>,
}

impl TelemetryReading {
    fn default_for(field: Field) -> Self {
        Self {
            value: field.default_value(),
            updated_at: None,
        }
    }

    pub fn is_set(&self) -> bool {
        self.updated_at.is_some()
    }
}

/// Point-in-time copy of every field in a profile.
///
/// Each field is copied under its own lock; values of different fields may
/// come from different moments.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySnapshot {
    profile: DeviceProfile,
    taken_at: DateTime<Utc>,
    readings: BTreeMap<Field, TelemetryReading>,
}

impl TelemetrySnapshot {
    pub fn profile(&self) -> DeviceProfile {
        self.profile
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn get(&self, field: Field) -> Option<&TelemetryReading> {
        self.readings.get(&field)
    }

    /// Formatted value of `field`, or `None` if the profile does not carry it.
    pub fn formatted(&self, field: Field) -> Option<String> {
        self.readings.get(&field).map(|r| field.format(&r.value))
    }

    /// Formatted value for a template token such as `UP_TIME`.
    pub fn resolve_placeholder(&self, token: &str) -> Option<String> {
        Field::from_placeholder(token).and_then(|f| self.formatted(f))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, &TelemetryReading)> {
        self.readings.iter().map(|(f, r)| (*f, r))
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TelemetryStore
// ────────────────────────────────────────────────────────────────────────────

/// Fixed-field, per-field-locked telemetry state.
///
/// # Example
///
/// ```
/// use rtkdash_store::TelemetryStore;
/// use rtkdash_types::{DeviceProfile, Field, FieldValue, Role};
///
/// let store = TelemetryStore::new(DeviceProfile::new(Role::BaseStation, false));
/// store.set("num_uploads", 12);
/// assert_eq!(store.get_field(Field::NumUploads), FieldValue::Integer(12));
///
/// // Unknown names are logged and dropped.
/// assert!(!store.set("bogus", 1));
/// ```
pub struct TelemetryStore {
    profile: DeviceProfile,
    slots: BTreeMap<Field, Mutex<TelemetryReading>>,
    sinks: Vec<Arc<dyn ChangeSink>>,
}

impl TelemetryStore {
    /// Build a store holding the default value of every field in `profile`.
    pub fn new(profile: DeviceProfile) -> Self {
        let slots = profile
            .fields()
            .into_iter()
            .map(|f| (f, Mutex::new(TelemetryReading::default_for(f))))
            .collect();
        Self {
            profile,
            slots,
            sinks: Vec::new(),
        }
    }

    /// Register a sink notified of every accepted write (builder-style).
    pub fn with_sink(mut self, sink: Arc<dyn ChangeSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn profile(&self) -> DeviceProfile {
        self.profile
    }

    /// Fields carried by this store, in display order.
    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.slots.keys().copied()
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Write `value` to the field called `name`.
    ///
    /// Unknown names, fields outside this profile and type mismatches are
    /// logged and discarded; no other field is touched. Returns whether the
    /// write was applied.
    pub fn set(&self, name: &str, value: impl Into<FieldValue>) -> bool {
        let result = name
            .parse::<Field>()
            .and_then(|field| self.try_set_field(field, value.into()));
        self.log_rejection(name, result)
    }

    /// Typed variant of [`set`](Self::set).
    pub fn set_field(&self, field: Field, value: impl Into<FieldValue>) -> bool {
        let result = self.try_set_field(field, value.into());
        self.log_rejection(field.name(), result)
    }

    /// Parse `raw` according to the field's kind, then write it.
    pub fn set_str(&self, name: &str, raw: &str) -> bool {
        let result = name
            .parse::<Field>()
            .and_then(|field| field.parse(raw).and_then(|v| self.try_set_field(field, v)));
        self.log_rejection(name, result)
    }

    /// Write `value` to `field`, returning why a write was refused.
    pub fn try_set_field(&self, field: Field, value: FieldValue) -> Result<(), DashError> {
        let slot = self.slots.get(&field).ok_or_else(|| DashError::FieldNotInRole {
            field: field.name().to_string(),
            role: self.profile.role,
        })?;
        let value = field.coerce(value)?;
        let now = Utc::now();

        let mut reading = lock(slot);
        reading.value = value;
        reading.updated_at = Some(now);

        if !self.sinks.is_empty() {
            let change = FieldChange {
                field,
                formatted: field.format(&reading.value),
                value: reading.value.clone(),
                at: now,
            };
            // Still under the slot lock: sinks observe this field's writes
            // in application order.
            for sink in &self.sinks {
                sink.field_changed(&change);
            }
        }
        Ok(())
    }

    fn log_rejection(&self, name: &str, result: Result<(), DashError>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(field = name, role = %self.profile.role, error = %e, "discarding telemetry write");
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Latest value of the field called `name`; `None` for unknown names.
    pub fn get(&self, name: &str) -> Option<FieldValue> {
        Field::from_name(name).map(|f| self.get_field(f))
    }

    /// Latest value of `field`, or its default if it was never written or
    /// is not carried by this profile.
    pub fn get_field(&self, field: Field) -> FieldValue {
        match self.slots.get(&field) {
            Some(slot) => lock(slot).value.clone(),
            None => {
                debug!(field = field.name(), "read of field outside profile");
                field.default_value()
            }
        }
    }

    /// Full reading (value and timestamp) of `field`.
    pub fn reading(&self, field: Field) -> Option<TelemetryReading> {
        self.slots.get(&field).map(|slot| lock(slot).clone())
    }

    /// Current value of `field` rendered with its fixed formatting.
    pub fn formatted(&self, field: Field) -> String {
        field.format(&self.get_field(field))
    }

    /// Copy every field, each under its own lock.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let readings = self
            .slots
            .iter()
            .map(|(f, slot)| (*f, lock(slot).clone()))
            .collect();
        TelemetrySnapshot {
            profile: self.profile,
            taken_at: Utc::now(),
            readings,
        }
    }
}

impl std::fmt::Debug for TelemetryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryStore")
            .field("profile", &self.profile)
            .field("fields", &self.slots.len())
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

/// A poisoned slot still holds a complete value: writes replace the whole
/// reading in one assignment.
fn lock(slot: &Mutex<TelemetryReading>) -> MutexGuard<'_, TelemetryReading> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtkdash_types::Role;
    use std::thread;

    #[derive(Default)]
    struct RecordingSink {
        changes: Mutex<Vec<FieldChange>>,
    }

    impl RecordingSink {
        fn formatted_for(&self, field: Field) -> Vec<String> {
            self.changes
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.field == field)
                .map(|c| c.formatted.clone())
                .collect()
        }
    }

    impl ChangeSink for RecordingSink {
        fn field_changed(&self, change: &FieldChange) {
            self.changes.lock().unwrap().push(change.clone());
        }
    }

    fn rover() -> TelemetryStore {
        TelemetryStore::new(DeviceProfile::new(Role::Rover, true))
    }

    #[test]
    fn unset_fields_return_defaults() {
        let store = rover();
        assert_eq!(store.get("up_time"), Some(FieldValue::Integer(0)));
        assert_eq!(store.get("fix"), Some(FieldValue::from("NONE")));
        assert!(!store.reading(Field::RtkAge).unwrap().is_set());
    }

    #[test]
    fn set_overwrites_value_and_timestamp() {
        let store = rover();
        assert!(store.set("rtk_ratio", 3.4));
        let reading = store.reading(Field::RtkRatio).unwrap();
        assert_eq!(reading.value, FieldValue::Decimal(3.4));
        assert!(reading.is_set());
        assert_eq!(store.formatted(Field::RtkRatio), "3.4");
    }

    #[test]
    fn unknown_field_write_leaves_defined_fields_untouched() {
        let store = rover();
        store.set("up_time", 42);
        let before = store.snapshot();

        assert!(!store.set("bogus", 7));
        assert!(!store.set("", 7));
        assert!(!store.set("UP_TIME", 7));

        let after = store.snapshot();
        assert_eq!(after.len(), before.len());
        for (field, reading) in before.iter() {
            assert_eq!(after.get(field), Some(reading));
        }
    }

    #[test]
    fn field_outside_role_is_rejected() {
        let store = TelemetryStore::new(DeviceProfile::new(Role::BaseStation, false));
        assert!(!store.set("lattitude", 39.0));
        assert_eq!(store.snapshot().len(), 2);
        assert!(matches!(
            store.try_set_field(Field::Voltage, FieldValue::Decimal(4.1)),
            Err(DashError::FieldNotInRole { .. })
        ));
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let store = rover();
        store.set("up_time", 10);
        assert!(!store.set("up_time", 10.5));
        assert!(!store.set("rtk_age", "old"));
        assert_eq!(store.get("up_time"), Some(FieldValue::Integer(10)));
    }

    #[test]
    fn set_str_parses_by_kind() {
        let store = rover();
        assert!(store.set_str("lattitude", "39.281507"));
        assert!(store.set_str("cs_gal", "2"));
        assert!(store.set_str("rtk_mode", "FIXED"));
        assert!(!store.set_str("cs_gal", "two"));
        assert_eq!(store.formatted(Field::Latitude), "39.281507");
        assert_eq!(store.get("cs_gal"), Some(FieldValue::Integer(2)));
    }

    #[test]
    fn snapshot_resolves_placeholders() {
        let store = rover();
        store.set("battery_soc", 87.26);
        let snap = store.snapshot();
        assert_eq!(snap.resolve_placeholder("BATTERY_SOC").as_deref(), Some("87.3"));
        assert_eq!(snap.resolve_placeholder("BATT_CHARGE").as_deref(), Some("87.3"));
        assert_eq!(snap.resolve_placeholder("NUM_UPLOADS"), None);
    }

    #[test]
    fn sink_receives_every_write_in_order() {
        let sink = Arc::new(RecordingSink::default());
        let store = rover().with_sink(sink.clone());

        for age in 0..5 {
            store.set("rtk_age", age);
        }
        // Same value twice is still two writes.
        store.set("rtk_age", 4);

        assert_eq!(sink.formatted_for(Field::RtkAge), vec!["0", "1", "2", "3", "4", "4"]);
    }

    #[test]
    fn sink_not_called_for_rejected_writes() {
        let sink = Arc::new(RecordingSink::default());
        let store = rover().with_sink(sink.clone());
        store.set("bogus", 1);
        store.set("up_time", "x");
        assert!(sink.changes.lock().unwrap().is_empty());
    }

    #[test]
    fn concurrent_writers_to_same_field_agree_with_sink_order() {
        let sink = Arc::new(RecordingSink::default());
        let store = rover().with_sink(sink.clone());

        thread::scope(|s| {
            for t in 0..4 {
                let store = &store;
                s.spawn(move || {
                    for i in 0..250 {
                        store.set_field(Field::CsGps, t * 1000 + i);
                    }
                });
            }
        });

        let seen = sink.formatted_for(Field::CsGps);
        assert_eq!(seen.len(), 1000);
        // The last notification is the value left in the store.
        assert_eq!(seen.last().cloned(), Some(store.formatted(Field::CsGps)));
    }

    #[test]
    fn concurrent_writers_to_different_fields_do_not_interfere() {
        let store = rover();
        thread::scope(|s| {
            s.spawn(|| {
                for i in 0..500 {
                    store.set_field(Field::RtkEast, f64::from(i));
                }
            });
            s.spawn(|| {
                for i in 0..500 {
                    store.set_field(Field::RtkNorth, -f64::from(i));
                }
            });
        });
        assert_eq!(store.formatted(Field::RtkEast), "499.000");
        assert_eq!(store.formatted(Field::RtkNorth), "-499.000");
    }
}
