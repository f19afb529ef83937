//! ptops-ingest: offline support-bundle ingestion for ptop performance logs
//!
//! Turns ptop log bundles into labeled, time-stamped metric samples, written in batches
//! to a pluggable sink. Bundles are content-hashed so repeated loads are idempotent, and
//! a sled-backed registry keeps exactly zero or one bundle active.

pub mod bundle;
pub mod cli;
pub mod config;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod sink;
pub mod types;

pub use bundle::{BundleRecord, BundleRegistry, BundleStatus, LoadRequest};
pub use error::{BundleError, PtopsError};
pub use sink::SampleSink;
pub use types::MetricSample;
