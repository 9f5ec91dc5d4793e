//! wisp-core: Shared library for the wisp ghost-text shell wrapper.
//!
//! This crate provides:
//! - Error types
//! - Logging setup
//! - On-disk configuration repository for engine credentials
//! - The suggestion engine interface and its concrete backends

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;

pub use config::Repository;
pub use engine::{Suggestion, SuggestionEngine, UserPrompt};
pub use error::{Error, Result};
pub use logging::init_logging;
