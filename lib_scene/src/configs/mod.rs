//! # Configuration Modules
//!
//! Engine tuning loaded from JSON, with defaults for every field.

/// Thresholds, intervals and eviction settings for the engine.
pub mod engine_config;
