//! [`PageRouter`] – maps request paths to pages and data endpoints.
//!
//! | Path | Reply | Available when |
//! |---|---|---|
//! | `/` | role home page | always |
//! | `/rtk` | role RTK status page | always |
//! | `/tinkercharge` | power page | power module fitted |
//! | `/gnss` | position page | rover |
//! | `/map` | map shell polling `/loc` | rover |
//! | `/loc` | `"<lat>,<lon>"` | rover |
//! | `/sat` | satellite table shell | rover |
//! | `/satellites` | satellite rows as JSON | rover |
//! | `/events` | Server-Sent Events stream | always |
//!
//! Query strings are ignored. Paths that do not exist for the running profile
//! are 404, exactly like paths that do not exist at all.

use std::sync::Arc;

use rtkdash_store::{SatelliteTable, TelemetryStore};
use rtkdash_types::{DashError, DeviceProfile, Field, Role};

use crate::pages;
use crate::renderer::TemplateRenderer;

// ────────────────────────────────────────────────────────────────────────────
// Route
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Home,
    Rtk,
    TinkerCharge,
    Gnss,
    Map,
    Location,
    Sat,
    Satellites,
    Events,
}

impl Route {
    pub const ALL: [Route; 9] = [
        Route::Home,
        Route::Rtk,
        Route::TinkerCharge,
        Route::Gnss,
        Route::Map,
        Route::Location,
        Route::Sat,
        Route::Satellites,
        Route::Events,
    ];

    pub fn path(self) -> &'static str {
        match self {
            Route::Home => "/",
            Route::Rtk => "/rtk",
            Route::TinkerCharge => "/tinkercharge",
            Route::Gnss => "/gnss",
            Route::Map => "/map",
            Route::Location => "/loc",
            Route::Sat => "/sat",
            Route::Satellites => "/satellites",
            Route::Events => "/events",
        }
    }

    pub fn from_path(path: &str) -> Option<Route> {
        Route::ALL.into_iter().find(|r| r.path() == path)
    }

    /// Whether a device with `profile` serves this route.
    pub fn available_for(self, profile: &DeviceProfile) -> bool {
        match self {
            Route::Home | Route::Rtk | Route::Events => true,
            Route::TinkerCharge => profile.power_module,
            // A base station keeps no lattitude/longitude fields, so it has
            // nothing for the map to poll.
            Route::Gnss | Route::Map | Route::Location => profile.has_position(),
            Route::Sat | Route::Satellites => profile.role == Role::Rover,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Reply
// ────────────────────────────────────────────────────────────────────────────

/// What the server should send back for a resolved route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Html(String),
    Text(String),
    Json(String),
    /// Hand the connection to the event broadcaster.
    EventStream,
}

impl Reply {
    pub fn content_type(&self) -> &'static str {
        match self {
            Reply::Html(_) => "text/html; charset=utf-8",
            Reply::Text(_) => "text/plain; charset=utf-8",
            Reply::Json(_) => "application/json",
            Reply::EventStream => "text/event-stream",
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PageRouter
// ────────────────────────────────────────────────────────────────────────────

pub struct PageRouter {
    store: Arc<TelemetryStore>,
    satellites: Arc<SatelliteTable>,
    renderer: TemplateRenderer,
}

impl PageRouter {
    pub fn new(store: Arc<TelemetryStore>, satellites: Arc<SatelliteTable>) -> Self {
        Self {
            renderer: TemplateRenderer::new(Arc::clone(&store)),
            store,
            satellites,
        }
    }

    pub fn profile(&self) -> DeviceProfile {
        self.store.profile()
    }

    /// Resolve `method` and request `target` to a route this device serves.
    ///
    /// # Errors
    ///
    /// * [`DashError::NotFound`] – unknown path, or not served by this profile.
    /// * [`DashError::MethodNotAllowed`] – known path, method other than `GET`.
    pub fn resolve(&self, method: &str, target: &str) -> Result<Route, DashError> {
        let path = strip_query(target);
        let route = Route::from_path(path)
            .filter(|r| r.available_for(&self.profile()))
            .ok_or_else(|| DashError::NotFound(path.to_string()))?;

        if method != "GET" {
            return Err(DashError::MethodNotAllowed(format!("{method} {path}")));
        }
        Ok(route)
    }

    /// Produce the reply body for an already resolved `route`.
    pub fn respond(&self, route: Route) -> Result<Reply, DashError> {
        let role = self.profile().role;
        let reply = match route {
            Route::Home => Reply::Html(self.renderer.render(match role {
                Role::BaseStation => pages::HOME_BASE,
                Role::Rover => pages::HOME_ROVER,
            })),
            Route::Rtk => Reply::Html(self.renderer.render(match role {
                Role::BaseStation => pages::RTK_BASE,
                Role::Rover => pages::RTK_ROVER,
            })),
            Route::TinkerCharge => Reply::Html(self.renderer.render(pages::TINKERCHARGE)),
            Route::Gnss => Reply::Html(self.renderer.render(pages::GNSS)),
            Route::Map => Reply::Html(pages::MAP.to_string()),
            Route::Sat => Reply::Html(pages::SAT.to_string()),
            Route::Location => Reply::Text(self.location()),
            Route::Satellites => Reply::Json(
                serde_json::to_string(&self.satellites.rows())
                    .map_err(|e| DashError::Transport(format!("satellite rows: {e}")))?,
            ),
            Route::Events => Reply::EventStream,
        };
        Ok(reply)
    }

    /// [`resolve`](Self::resolve) then [`respond`](Self::respond).
    pub fn handle(&self, method: &str, target: &str) -> Result<Reply, DashError> {
        let route = self.resolve(method, target)?;
        self.respond(route)
    }

    /// Latest coordinates, formatted exactly as on the position page.
    fn location(&self) -> String {
        format!(
            "{},{}",
            self.store.formatted(Field::Latitude),
            self.store.formatted(Field::Longitude)
        )
    }
}

impl std::fmt::Debug for PageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageRouter")
            .field("profile", &self.profile())
            .finish()
    }
}

fn strip_query(target: &str) -> &str {
    target.split(['?', '#']).next().unwrap_or(target)
}
