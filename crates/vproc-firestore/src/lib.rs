//! Firestore REST client and the video status repository.
//!
//! This crate provides:
//! - `FirestoreClient` with token caching, expired-token retry and backoff
//! - `StatusRepository`, the processing-status surface the worker writes to
//! - Firestore value conversions

pub mod client;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod status_repo;
pub mod token_cache;
pub mod types;


pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{FirestoreError, FirestoreResult};
pub use retry::RetryConfig;
pub use status_repo::{FirestoreStatusRepository, StatusRepository, VideoStatus};
pub use token_cache::AuthSource;
pub use types::{Document, FromFirestoreValue, ToFirestoreValue, Value};
