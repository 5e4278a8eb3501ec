pub mod aggregate;
pub mod api;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod ingest;
pub mod interval;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod planner;
pub mod query;
pub mod store;
pub mod validators;

pub use error::{Result, TimeseriesError};
