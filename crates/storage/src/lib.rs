//! Storage (C4): the Postgres-backed document store and its §4.4 decision
//! table for classifying an incoming crawl as new / new_site / edit / skip.

pub mod decision;
pub mod policy;
pub mod rows;
pub mod store;

pub use rows::DocumentWrite;
pub use store::Storage;
