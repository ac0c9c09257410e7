//! Service exposure protocol types
//!
//! This library defines the contract between exposed services and the
//! exposure controller:
//! - Annotation and label keys a service uses to request exposure
//! - Marker keys stamped on generated routing resources
//! - Strategy configuration shared by every exposer

pub mod annotations;
pub mod config;

pub use config::{ConfigError, ExposerKind, PathMode, StrategyConfig, WildcardScope};
