//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the sync engine:
//! - Logging and tracing infrastructure
//! - Configuration loading and validation
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the engine and the binary depend
//! on. It owns the configuration file format, its environment overrides and
//! the logging conventions used throughout the workspace.

pub mod config;
pub mod error;
pub mod logging;

pub use config::Settings;
pub use error::{Error, Result};
