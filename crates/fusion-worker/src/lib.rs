//! fusion-worker - Embedding queue worker
//!
//! Workers claim one `pending` object at a time, call the embedding
//! provider under a timeout, and commit the vector only if the claim is
//! still current. Failures are retried with exponential backoff until the
//! attempt ceiling moves the row to the dead-letter state.
//!
//! Several workers may share one store; the store's conditional claim is
//! the only coordination between them.

mod retry;
mod worker;

pub use retry::{backoff_for_attempt, sanitize_error, validate_vector};
pub use worker::{run_pool, DrainReport, EmbeddingWorker, JobOutcome};
