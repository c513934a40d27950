//! fusion-mcp - Tool-style service facade
//!
//! Exposes the indexing gateway, the search engine and the embedding queue
//! introspection as tools that take JSON-shaped parameters and return a
//! [`ToolResult`].
//!
//! # Tools
//!
//! - `fusion_upsert` - Index or update one object
//! - `fusion_search` - Hybrid search with rank fusion
//! - `fusion_embedding_status` - Queue counts and rows by status
//! - `fusion_dead_letters` - Dead-lettered rows with their last error
//! - `fusion_requeue` - Move a dead-lettered row back to pending
//! - `fusion_stats` - Store statistics

mod server;

pub use server::{
    DeadLetterParams, FusionServer, RequeueParams, ServerInfo, StatusParams, ToolInfo, ToolResult,
};
