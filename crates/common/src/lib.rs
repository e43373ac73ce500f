//! Shared data model, configuration, and error types for the SiteSearch core.
//!
//! This crate has no knowledge of Redis, Postgres, or Qdrant — it only
//! defines the shapes every other crate in the workspace agrees on.

pub mod config;
pub mod error;
pub mod hash;
pub mod model;
pub mod retry;

pub use error::{CoreError, Result, WorkerFailure};
pub use model::*;
