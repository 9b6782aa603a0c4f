//! Core library components.
//!
//! This module contains the plugin service, its KMS backends, the transport
//! and HTTP surfaces, and configuration handling.

pub mod config;
pub mod constants;
pub mod http;
pub mod kms;
pub mod lifecycle;
pub mod metrics;
pub mod plugin;
pub mod readiness;
pub mod transport;
pub mod types;
