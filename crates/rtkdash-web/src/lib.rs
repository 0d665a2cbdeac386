//! `rtkdash-web` – the dashboard's HTTP surface.
//!
//! # Modules
//!
//! - [`renderer`] – [`TemplateRenderer`]: single-pass `%NAME%` substitution
//!   against a telemetry snapshot.
//! - [`router`] – [`PageRouter`]: path and profile → page, `/loc`,
//!   `/satellites` or the event stream.
//! - [`server`] – [`DashboardServer`]: Tokio TCP listener speaking just enough
//!   HTTP/1.1 for the pages and Server-Sent Events.
//! - [`pages`] – page templates embedded at compile time.

pub mod pages;
pub mod renderer;
pub mod router;
pub mod server;

pub use renderer::{TemplateRenderer, render_snapshot};
pub use router::{PageRouter, Reply, Route};
pub use server::{DEFAULT_PORT, DashboardServer};
