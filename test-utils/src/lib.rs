//! Shared test utilities for the vault session workspace.
//!
//! This crate provides:
//! - Proptest generators for credentials, tokens and client output
//! - Fixtures with canned vault client output
//! - A scriptable fake vault client binary (unix only)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
#[cfg(unix)]
pub mod mocks;

pub use generators::*;
