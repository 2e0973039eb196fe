// Core modules
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod poller;
pub mod signal;
pub mod web;

// Re-export commonly used types
pub use db::SampleStore;
pub use error::{FetchError, QueryError, StorageError, StoreError};
pub use models::*;
