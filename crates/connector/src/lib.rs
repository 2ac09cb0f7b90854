//! bxfeed-connector-lib: hub feed runtime
//!
//! Keeps an authenticated, multi-channel hub subscription alive under a
//! heartbeat watchdog, decodes pushes into typed events for registered
//! handlers, and exposes memoized REST accessors next to the live feed.

pub mod accessors;
pub mod auth;
pub mod decode;
pub mod dispatch;
pub mod error;
pub mod hub;
pub mod messages;
pub mod metrics;
pub mod orchestrator;
pub mod resolver;
pub mod server;
pub mod traits;
pub mod watchdog;

pub use accessors::RestAccessors;
pub use auth::ApiCredentials;
pub use dispatch::{handler_fn, HandlerRegistry};
pub use error::{ConnectorError, DecodeError, ExchangeError, ResolverError};
pub use hub::{
    ClientConfig, ConnectionState, HubTransport, SignalrTransport, SubscriptionClient,
    HEARTBEAT_CHANNEL,
};
pub use messages::{Balance, Category, Execution, FeedEvent, Order, Side, Ticker, Trade};
pub use metrics::HubMetrics;
pub use orchestrator::{Control, FeedOrchestrator};
pub use resolver::{resolve_credentials, EnvResolver};
pub use server::{create_router, run_server, ServerState};
pub use traits::{ExchangeApi, FeedHandler, HandlerError, HandlerResult, KeyResolver};
pub use watchdog::{Watchdog, WatchdogExit};
