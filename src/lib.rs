//! Live bus location sharing.
//!
//! Drivers publish their position to a last-write-wins [`registry::Registry`]
//! over HTTP; viewers poll the full snapshot and reconcile it into map
//! markers with [`agents::reconciler`].

pub mod agents;
pub mod config;
pub mod handlers;
pub mod jwt_auth;
pub mod models;
pub mod registry;
pub mod server;
pub mod task;
