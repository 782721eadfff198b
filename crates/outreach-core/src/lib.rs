//! # Outreach Core
//!
//! Shared foundation for the Outreach dispatcher: configuration, error
//! taxonomy, the job/attempt data model, and the provider trait.
//!
//! Everything downstream (store, cadence, providers, dispatch, gateway)
//! depends on this crate; it depends on nothing in-workspace.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::OutreachConfig;
pub use error::{OutreachError, Result};
pub use traits::Provider;
pub use types::{
    CadenceType, CustomInterval, DeliveryAttempt, DispatchSummary, IntervalUnit, Job, JobOutcome,
    JobStatus, OutboundMessage, SendResult,
};
