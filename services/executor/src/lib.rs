//! Command executor service.
//!
//! Pulls JSON command envelopes off a server transport with a fixed pool of
//! workers, executes them against an insertion-ordered key/value store, and
//! replies with JSON response bodies.

pub mod config;
pub mod consumer;
pub mod handler;

pub use config::ExecutorConfig;
pub use consumer::{Consumer, RequestHandler};
pub use handler::MapCommandHandler;
