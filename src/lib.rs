//! # Travis CI Connector Library
//!
//! Incremental export of a repository's Travis CI build history as tables,
//! plus the OAuth proxy and HTTP surface that drive it.

pub mod config;
pub mod connectors;
pub mod error;
pub mod handlers;
pub mod models;
pub mod oauth;
pub mod server;
pub mod telemetry;
