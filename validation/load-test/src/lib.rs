//! Load testing tool for z/x/y tile servers.
//!
//! This crate provides tools to:
//! - Generate tile coordinates (random or deterministic sweep) inside a box
//! - Drive a pool of workers issuing tile GETs under a time or request budget
//! - Aggregate latency percentiles, throughput and status codes
//! - Append results to a CSV history and print a console summary

pub mod client;
pub mod config;
pub mod error;
pub mod generator;
pub mod metrics;
pub mod report;
pub mod runner;
pub mod worker;

pub use client::{AcceptPolicy, Outcome, TileClient};
pub use config::{FixedMode, Pattern, TestConfig, TileBounds};
pub use error::{ConfigError, MetricsError, ReportError};
pub use generator::{format_url, TileCoord, TileGenerator};
pub use metrics::{MetricsCollector, TestResults};
pub use report::ResultsReport;
pub use runner::{LoadRunner, RunPhase};
