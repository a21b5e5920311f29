//! Configuration module for hardsub
//!
//! Handles loading configuration from TOML files, writing the default file and
//! environment variable overrides.

pub mod config;

pub use config::*;
