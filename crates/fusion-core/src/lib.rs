//! fusion-core - Core types and traits for the hybrid search engine
//!
//! This crate provides the domain model (indexed objects, embedding
//! lifecycle, search requests and hits), the storage and embedding traits,
//! configuration, and error handling shared by every other crate.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::{FusionError, Result};
pub use traits::*;
pub use types::*;
