//! fusion-index - Indexing gateway
//!
//! The single entry point for writes. Requests are validated synchronously,
//! hashed, and handed to the index store, which decides whether the object
//! needs (re-)embedding. The gateway never talks to an embedding provider.
//!
//! # Example
//!
//! ```rust,ignore
//! use fusion_index::{IndexingGateway, UpsertRequest};
//!
//! let gateway = IndexingGateway::new(store);
//! let response = gateway.upsert(UpsertRequest::new("fault", "f-1", "y1", "bilge alarm")).await?;
//! assert!(response.accepted);
//! ```

mod gateway;

pub use gateway::{IndexingGateway, UpsertRequest, UpsertResponse};
