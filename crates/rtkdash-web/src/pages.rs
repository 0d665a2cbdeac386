//! Page templates compiled into the binary.
//!
//! Templated pages carry `%NAME%` placeholders for their initial values and
//! subscribe to `/events` for live updates; every live element carries the
//! event name in `data-event`. `MAP` and `SAT` are static shells that poll
//! `/loc` and `/satellites`.

pub const HOME_BASE: &str = include_str!("../pages/home_base.html");
pub const HOME_ROVER: &str = include_str!("../pages/home_rover.html");
pub const RTK_BASE: &str = include_str!("../pages/rtk_base.html");
pub const RTK_ROVER: &str = include_str!("../pages/rtk_rover.html");
pub const TINKERCHARGE: &str = include_str!("../pages/tinkercharge.html");
pub const GNSS: &str = include_str!("../pages/gnss.html");
pub const MAP: &str = include_str!("../pages/map.html");
pub const SAT: &str = include_str!("../pages/sat.html");

#[cfg(test)]
mod tests {
    use super::*;
    use rtkdash_types::{DeviceProfile, Field, Role};

    /// Every field of `profile` must appear both as a placeholder and as a
    /// live-update binding somewhere in `pages`.
    fn assert_covers(profile: DeviceProfile, pages: &[&str]) {
        for field in profile.fields() {
            let bound = pages
                .iter()
                .any(|p| p.contains(&format!("data-event=\"{}\"", field.name())));
            assert!(bound, "{field} has no live binding");

            let tokens: Vec<String> = std::iter::once(field.placeholder())
                .chain(
                    ["BATT_CHARGE", "BATT_CAPACITY", "TEMPERATURE"]
                        .into_iter()
                        .filter(|alias| Field::from_placeholder(alias) == Some(field))
                        .map(String::from),
                )
                .collect();
            let placeholder = pages
                .iter()
                .any(|p| tokens.iter().any(|t| p.contains(&format!("%{t}%"))));
            assert!(placeholder, "{field} has no placeholder");
        }
    }

    #[test]
    fn base_station_pages_cover_every_field() {
        assert_covers(
            DeviceProfile::new(Role::BaseStation, true),
            &[RTK_BASE, TINKERCHARGE],
        );
    }

    #[test]
    fn rover_pages_cover_every_field() {
        assert_covers(
            DeviceProfile::new(Role::Rover, true),
            &[RTK_ROVER, GNSS, TINKERCHARGE],
        );
    }

    #[test]
    fn shells_poll_their_data_endpoints() {
        assert!(MAP.contains("\"/loc\""));
        assert!(MAP.contains("2000"));
        assert!(SAT.contains("\"/satellites\""));
        assert!(SAT.contains("id=\"sat_table\""));
    }

    #[test]
    fn templated_pages_subscribe_to_events() {
        for page in [HOME_BASE, HOME_ROVER, RTK_BASE, RTK_ROVER, TINKERCHARGE, GNSS] {
            assert!(page.contains("new EventSource(\"/events\")"));
        }
    }
}
