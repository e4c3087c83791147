//! Operations toolkit for the Honeycomb API.
//!
//! This crate provides the shared machinery behind the `hnyctl` subcommands:
//! - A resilient HTTP client with retry, rate-limit backoff, and pagination
//! - A builder for analytical query specifications
//! - Create→poll→retrieve orchestration for async server-side work
//! - Adaptive batch execution that isolates poisoned items
//! - Board building, schema cleanup, dependency tracking, and SLO reporting
//!   on top of those pieces
//!
//! # Example
//! ```ignore
//! use hnyctl::client::ApiClient;
//! use hnyctl::query::QuerySpec;
//!
//! let client = ApiClient::new(base_url, api_key);
//! let spec = QuerySpec::builder().time_range(3600).build();
//! let rows = client.run_query("my-dataset", &spec, max_wait, interval).await?;
//! ```

pub mod batch;
pub mod boards;
pub mod cleanup;
pub mod client;
pub mod config;
pub mod deps;
pub mod error;
pub mod poll;
pub mod query;
pub mod report;
pub mod store;

// Re-export commonly used types
pub use batch::{run_adaptive, BatchOutcome};
pub use client::ApiClient;
pub use error::{HnyError, Result};
pub use poll::{await_ready, PollState};
pub use query::QuerySpec;
