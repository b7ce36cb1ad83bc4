//! # docflow-core
//!
//! Core types, traits, and abstractions for the docflow document
//! ingestion pipeline.
//!
//! This crate provides the foundational data structures and trait
//! definitions that other docflow crates depend on: the job state
//! machine, the error taxonomy, content-addressed storage key
//! derivation, and the repository interfaces.

pub mod addressing;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod state;
pub mod tokens;
pub mod traits;
pub mod validation;

// Re-export commonly used types at crate root
pub use addressing::{compute_content_hash, derive_key, derive_parsed_key, sanitize_extension};
pub use error::{classify_http_status, Error, ErrorClass, Result};
pub use models::*;
pub use tokens::estimate_tokens;
pub use traits::*;
pub use validation::{validate_upload, UploadRejection};
