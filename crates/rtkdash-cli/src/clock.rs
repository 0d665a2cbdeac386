//! Uptime clock: publishes `up_time` (whole minutes since start).

use std::sync::Arc;
use std::time::Duration;

use rtkdash_store::TelemetryStore;
use rtkdash_types::Field;
use tokio::time::{self, Instant, MissedTickBehavior};

pub fn uptime_minutes(elapsed: Duration) -> i64 {
    (elapsed.as_secs() / 60) as i64
}

/// Write `up_time` immediately and then every `period`, forever.
pub async fn run_uptime_clock(store: Arc<TelemetryStore>, period: Duration) {
    let started = Instant::now();
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        store.set_field(Field::UpTime, uptime_minutes(started.elapsed()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtkdash_types::{DeviceProfile, FieldValue, Role};

    #[test]
    fn minutes_round_down() {
        assert_eq!(uptime_minutes(Duration::from_secs(0)), 0);
        assert_eq!(uptime_minutes(Duration::from_secs(59)), 0);
        assert_eq!(uptime_minutes(Duration::from_secs(60)), 1);
        assert_eq!(uptime_minutes(Duration::from_secs(42 * 60 + 30)), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn clock_advances_up_time() {
        let store = Arc::new(TelemetryStore::new(DeviceProfile::new(Role::BaseStation, false)));
        let task = tokio::spawn(run_uptime_clock(Arc::clone(&store), Duration::from_secs(60)));

        time::sleep(Duration::from_secs(1)).await;
        assert!(store.reading(Field::UpTime).unwrap().is_set());
        assert_eq!(store.get_field(Field::UpTime), FieldValue::Integer(0));

        time::sleep(Duration::from_secs(3 * 60)).await;
        assert_eq!(store.get_field(Field::UpTime), FieldValue::Integer(3));
        task.abort();
    }
}
