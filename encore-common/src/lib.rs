//! # Encore Common Library
//!
//! Shared code for the Encore enrichment tools:
//! - Error type shared by storage and configuration code
//! - Configuration file discovery, loading and atomic writes

pub mod config;
pub mod error;

pub use error::{Error, Result};
