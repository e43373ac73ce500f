//! Queue Broker Client (C1): a thin, atomic layer over Redis exposing the
//! FIFO pending/processing/completed/failed sub-queues described in §4.1.

pub mod client;
pub mod keys;
pub mod metrics;

pub use client::QueueBroker;
pub use metrics::QueueMetrics;
