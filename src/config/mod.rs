//! Configuration module for the reader.
//!
//! Provides CLI argument parsing and the mapping onto component configs.

#[allow(clippy::module_inception)]
mod config;

pub use config::{AppConfig, Backend, Provider};
