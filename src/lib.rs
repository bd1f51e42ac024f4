//! Tollgate - Per-route HTTP admission control
//!
//! This crate decides, for every inbound (client key, request path) pair,
//! whether the request may proceed. Paths are mapped to a token bucket, a
//! fixed window counter, or no limit at all by a live, reconfigurable set of
//! route rules; per-client limiter state is created lazily and kept in memory.

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
