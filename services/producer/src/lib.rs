//! Command producer service.
//!
//! Reads command envelopes from a pluggable feed and dispatches them over a
//! client transport, capping the number of in-flight requests and racing
//! every reply against a per-request timeout.

pub mod config;
pub mod feed;
pub mod producer;

pub use config::{FeedType, ProducerConfig};
pub use feed::{FeedError, FileRequestFeed, RandomRequestFeed, RequestFeed};
pub use producer::{Producer, ResponseHandler};
