//! `rtkdash-middleware` – pushes field changes to connected browsers.
//!
//! # Modules
//!
//! - [`broadcaster`] – [`EventBroadcaster`]: registry of per-client output
//!   channels. Every store write becomes one named Server-Sent Event fanned
//!   out to every live subscriber without ever blocking the producer.
//! - [`client`] – [`SseClient`]: handle to one subscription and its
//!   liveness state.
//! - [`frame`] – Server-Sent Events wire encoding.

pub mod broadcaster;
pub mod client;
pub mod frame;

pub use broadcaster::{BroadcasterConfig, EventBroadcaster, PublishReport, TickReport};
pub use client::{ClientState, SseClient};
