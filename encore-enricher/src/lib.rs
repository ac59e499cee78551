//! encore-enricher library
//!
//! Enriches stored artist records with audience statistics from the partner
//! API: credential caching, classified request execution, field-level merging
//! and bounded-concurrency batch runs.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod output;
pub mod services;
pub mod utils;

pub use error::{BatchError, CredentialError, FetchError};
