//! Remote content API
//!
//! Rate-limited, bounded-concurrency access to the booru-style search
//! and download endpoints.

pub mod client;

pub use client::ApiClient;
