//! # Outreach Gateway
//!
//! Thin HTTP surface over the store and the dispatcher. The interesting
//! endpoint is `POST /api/v1/dispatch`: an external cron (or a human with
//! curl) triggers one dispatcher invocation and gets the per-job summary
//! back as JSON. Everything except `/health` sits behind a shared secret.

pub mod routes;
pub mod server;

pub use server::{build_router, start, AppState};
