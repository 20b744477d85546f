//! InfluxDB v2 adapter: HTTP client and annotated CSV decoding.

pub mod client;
pub mod flux_csv;

pub use client::{InfluxClient, InfluxClientFactory};
