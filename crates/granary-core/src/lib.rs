//! Granary Core
//!
//! Core types, errors, and constants for the Granary virtual actor runtime.
//!
//! # Overview
//!
//! A grain is a virtual actor: it is addressed by a [`GrainId`] and always
//! exists logically. The runtime creates an in-memory activation on first
//! use, runs one turn at a time against it, and collects it when idle.
//! This crate defines the identity model, the invocation contract and the
//! ambient pieces (errors, configuration, telemetry, metrics) shared by the
//! runtime and the grains built on it.
//!
//! # TigerStyle
//!
//! - Explicit limits with big-endian naming (e.g., `GRAIN_KEY_LENGTH_BYTES_MAX`)
//! - Validation at construction, never deep inside a turn
//! - Errors carry the identity or method they concern

pub mod config;
pub mod constants;
pub mod error;
pub mod grain;
pub mod identity;
pub mod metrics;
pub mod telemetry;

pub use config::{ActivationConfig, DispatcherConfig, GranaryConfig};
pub use constants::*;
pub use error::{Error, Result};
pub use grain::{
    decode_argument, encode_argument, Grain, GrainClass, GrainContext, LiveGrain, MethodHandler,
    MethodTable, MethodTableBuilder,
};
pub use identity::{GrainId, GrainKey, GrainType};
pub use telemetry::{init_telemetry, TelemetryConfig};
