//! bxfeed-middleware: memoization of expensive producers
//!
//! `Memo` caches the result of a synchronous or asynchronous producer under a
//! key derived from the call's arguments, with a default TTL that can be
//! overridden or bypassed per call.

pub mod cache;

pub use cache::{CacheKey, CallArgs, CallOptions, Memo};
