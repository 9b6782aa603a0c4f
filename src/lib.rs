//! cloudkms-plugin - Envelope-encryption KMS plugin for container orchestrators.
//!
//! Serves the `v1beta1.KeyManagementService` gRPC API on a local Unix socket
//! and forwards each Encrypt/Decrypt to a remote key-management service bound
//! to one key.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── cli/              # Command-line interface and process runner
//! │   └── output        # Fatal error and hint formatting
//! ├── proto             # v1beta1 wire messages and generated service
//! └── core/             # Core library components
//!     ├── config        # TOML + flag configuration
//!     ├── kms/          # Remote key-management backends
//!     │   ├── mod       # KmsBackend trait, provider detection
//!     │   ├── gcp       # Google Cloud KMS REST client
//!     │   ├── token     # OAuth access token sources
//!     │   └── local     # In-process age key
//!     ├── plugin        # Version/Encrypt/Decrypt and self-verification
//!     ├── transport     # Unix socket bind/serve/dial
//!     ├── http          # Liveness and metrics endpoints
//!     ├── metrics       # Failure counters and latency histograms
//!     ├── readiness     # Once-only readiness flag
//!     └── lifecycle     # Startup sequencing and shutdown
//! ```
//!
//! # Features
//!
//! - Startup IAM permission check before serving
//! - In-process and over-the-socket round-trip self-tests
//! - Readiness-gated liveness probe
//! - Prometheus failure counters and latency histograms
//! - Graceful shutdown that releases the socket

pub mod cli;
pub mod core;
pub mod error;
pub mod proto;
