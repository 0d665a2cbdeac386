//! [`TemplateRenderer`] – substitutes `%NAME%` placeholders with formatted
//! telemetry.
//!
//! A placeholder is `%`, an upper-case ASCII letter, any run of upper-case
//! letters, digits or `_`, then `%`. Any other `%` is copied through untouched,
//! so CSS such as `width: 100%;` survives rendering.

use std::sync::Arc;

use rtkdash_store::{TelemetrySnapshot, TelemetryStore};

/// Renders page templates against a [`TelemetryStore`].
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    store: Arc<TelemetryStore>,
}

impl TemplateRenderer {
    pub fn new(store: Arc<TelemetryStore>) -> Self {
        Self { store }
    }

    /// Render `template` against a snapshot taken once, before the first
    /// token is resolved.
    pub fn render(&self, template: &str) -> String {
        let snapshot = self.store.snapshot();
        render_snapshot(template, &snapshot)
    }
}

/// Single left-to-right pass over `template`.
///
/// Known tokens become the field's formatted value; unknown tokens, and
/// fields the snapshot's profile does not carry, become the empty string.
/// Substituted text is never scanned again.
pub fn render_snapshot(template: &str, snapshot: &TelemetrySnapshot) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match token_len(after) {
            Some(len) => {
                if let Some(value) = snapshot.resolve_placeholder(&after[..len]) {
                    out.push_str(&value);
                }
                rest = &after[len + 1..];
            }
            None => {
                out.push('%');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Length of the token name at the start of `s` if it is closed by `%`.
fn token_len(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    if !bytes.first()?.is_ascii_uppercase() {
        return None;
    }
    let len = bytes
        .iter()
        .take_while(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || **b == b'_')
        .count();
    (bytes.get(len) == Some(&b'%')).then_some(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtkdash_types::{DeviceProfile, Role};

    fn rover() -> Arc<TelemetryStore> {
        Arc::new(TelemetryStore::new(DeviceProfile::new(Role::Rover, true)))
    }

    #[test]
    fn known_token_is_substituted_and_unknown_is_blanked() {
        let store = rover();
        store.set("up_time", 42);
        let renderer = TemplateRenderer::new(Arc::clone(&store));

        assert_eq!(renderer.render("<b>%UP_TIME%</b>|<i>%BOGUS%</i>"), "<b>42</b>|<i></i>");
    }

    #[tokio::test]
    async fn event_payloads_match_rendered_values() {
        use rtkdash_middleware::{EventBroadcaster, frame};
        use rtkdash_types::{ChangeSink, Field};
        use tokio::io::{AsyncReadExt, duplex};

        let broadcaster = Arc::new(EventBroadcaster::default());
        let store = Arc::new(
            TelemetryStore::new(DeviceProfile::new(Role::Rover, true))
                .with_sink(Arc::clone(&broadcaster) as Arc<dyn ChangeSink>),
        );
        let (w, mut r) = duplex(8192);
        broadcaster.subscribe(w);

        let writes: [(Field, f64); 5] = [
            (Field::Latitude, 39.2815074),
            (Field::RtkEast, 0.01249),
            (Field::Voltage, 12.345),
            (Field::BatterySoc, 87.26),
            (Field::TcTemp, 31.26),
        ];
        for (field, value) in writes {
            assert!(store.set(field.name(), value));
        }

        let mut buf = String::new();
        let mut events = Vec::new();
        let mut chunk = [0u8; 1024];
        while events.len() < writes.len() {
            let n = tokio::time::timeout(std::time::Duration::from_secs(2), r.read(&mut chunk))
                .await
                .expect("timed out waiting for events")
                .unwrap();
            assert!(n > 0);
            buf.push_str(std::str::from_utf8(&chunk[..n]).unwrap());
            let (parsed, used) = frame::parse(&buf);
            events.extend(parsed);
            buf.drain(..used);
        }

        let snapshot = store.snapshot();
        for ((field, _), event) in writes.iter().zip(&events) {
            assert_eq!(event.name, field.name());
            let rendered = render_snapshot(&format!("%{}%", field.placeholder()), &snapshot);
            assert_eq!(event.data, rendered, "{} differs between event and page", field.name());
        }
        assert_eq!(events[0].data, "39.281507");
        assert_eq!(events[4].data, "31.3");
    }

    #[test]
    fn literal_percent_signs_survive() {
        let renderer = TemplateRenderer::new(rover());
        let css = "td { width: 100%; } .x { height: 50% } %lower% %_X% %%";
        assert_eq!(renderer.render(css), css);
    }

    #[test]
    fn unterminated_token_is_literal() {
        let renderer = TemplateRenderer::new(rover());
        assert_eq!(renderer.render("100%UP_TIME"), "100%UP_TIME");
    }

    #[test]
    fn doubled_percent_before_token() {
        let store = rover();
        store.set("rtk_age", 7);
        let renderer = TemplateRenderer::new(store);
        assert_eq!(renderer.render("%%RTK_AGE%"), "%7");
    }

    #[test]
    fn fields_are_formatted_by_kind() {
        let store = rover();
        store.set("lattitude", 39.281507);
        store.set("rtk_east", 1.5);
        store.set("battery_soc", 87.26);
        store.set("fix", "RTK FIX");
        let renderer = TemplateRenderer::new(store);

        assert_eq!(
            renderer.render("%LATTITUDE% %RTK_EAST% %BATT_CHARGE% %FIX% %RTK_MODE%"),
            "39.281507 1.500 87.3 RTK FIX N/A"
        );
    }

    #[test]
    fn substituted_text_is_not_rescanned() {
        let store = rover();
        store.set("fix", "%UP_TIME%");
        store.set("up_time", 9);
        let renderer = TemplateRenderer::new(store);
        assert_eq!(renderer.render("%FIX%"), "%UP_TIME%");
    }

    #[test]
    fn fields_outside_the_profile_render_empty() {
        let store = Arc::new(TelemetryStore::new(DeviceProfile::new(Role::BaseStation, false)));
        store.set("num_uploads", 3);
        let renderer = TemplateRenderer::new(store);
        assert_eq!(renderer.render("[%NUM_UPLOADS%][%VOLTAGE%][%LATTITUDE%]"), "[3][][]");
    }

    #[test]
    fn rendering_is_repeatable_and_read_only() {
        let store = rover();
        store.set("rtk_ratio", 2.5);
        let renderer = TemplateRenderer::new(Arc::clone(&store));
        let before = store.snapshot();

        let template = crate::pages::RTK_ROVER;
        let first = renderer.render(template);
        let second = renderer.render(template);
        assert_eq!(first, second);
        assert!(first.contains(">2.5<"));

        let after = store.snapshot();
        for (field, reading) in before.iter() {
            assert_eq!(after.get(field), Some(reading));
        }
    }
}
