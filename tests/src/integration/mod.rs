//! # Integration Tests
//!
//! Flows through the public API only: subscribe, start, publish, stop.

pub mod concurrency;
pub mod properties;
pub mod scenarios;
