//! bxfeed-metadata: feed and environment configuration loaded from YAML

pub mod error;
pub mod feed;
pub mod environment;

pub use error::MetadataError;
pub use feed::{Feed, FeedStatus, Subscription, HEARTBEAT_CATEGORY};
pub use environment::{CacheConfig, Environment, KeySpec, KeyType};
