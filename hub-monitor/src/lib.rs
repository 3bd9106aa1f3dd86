//! Storage-hub telemetry ingestion and alert dispatch.
//!
//! Readings arrive over HTTP or MQTT, are stored, checked against the
//! temperature and humidity thresholds, and at most one open alert per hub is
//! raised. Alerts are fanned out to the hub manager's WhatsApp, SMS and email
//! channels by a background worker pool.

pub mod config;
pub mod db;
pub mod dedup;
pub mod dispatch;
pub mod errors;
pub mod memory;
pub mod metrics;
pub mod model;
pub mod mqtt;
pub mod notify;
pub mod pipeline;
pub mod rest;
pub mod store;
pub mod thresholds;
pub mod validate;
