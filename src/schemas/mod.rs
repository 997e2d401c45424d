//! Shared data model
//!
//! Tables are what the sink stores; metric sheets are what sources compute
//! before rendering them into tables.

pub mod identity;
pub mod metrics;
pub mod table;

pub use identity::*;
pub use metrics::*;
pub use table::*;
