//! Dashboard metrics sync
//!
//! Pulls engagement and output metrics from external platforms, buckets them
//! by calendar year and replaces the matching tables in a spreadsheet store.
//!
//! - Sources: YouTube, Eventbrite, LinkedIn, Medium, Google Scholar and the
//!   budget ledger
//! - Identity lookup tables kept in the store and validated on every run
//! - Per-source failure isolation with typed outcomes
//! - Quarterly update windows with a daily trigger
//! - Run state persisted for status and missed-window reporting

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod harvester;
pub mod http_client;
pub mod identity;
pub mod metrics;
pub mod schedule;
pub mod schemas;
pub mod sources;
pub mod storage;

pub use config::Config;
pub use error::{Result, SyncError};
pub use harvester::{Harvester, RunReport, SourceOutcome};
