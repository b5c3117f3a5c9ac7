//! Shared library for cross-cutting concerns in the vault session workspace.
//!
//! This crate provides centralized implementations for:
//! - Error types with retryability classification
//! - Retry policies with fixed or exponential backoff
//! - Shutdown signalling for cancellable waits
//! - Tracing subscriber initialization

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod retry;
pub mod shutdown;
pub mod tracing_config;

pub use error::{PlatformError, Retryable};
pub use retry::{RetryConfig, RetryPolicy};
pub use shutdown::{ShutdownSignal, ShutdownTrigger};
pub use tracing_config::{TracingConfig, init_tracing};
