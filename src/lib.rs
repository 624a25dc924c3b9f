//! Prescribing trend analysis for oral morphine solution.
//!
//! The run is a straight line: query (through a read-through cache) →
//! typed records → aggregation → chart documents.

pub mod bq;
pub mod cache;
pub mod charts;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod queries;
pub mod records;
pub mod report;

pub use error::{Result, RxError};
