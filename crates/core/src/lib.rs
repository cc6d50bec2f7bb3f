//! Core utilities for the tracer crates.
//!
//! This crate provides foundational types used across the workspace:
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timer
//! - Configuration management
//! - Generation-checked arena storage

pub mod arena;
mod config;
mod error;
mod logging;
mod timer;

pub use arena::{Arena, Handle};
pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::Timer;
