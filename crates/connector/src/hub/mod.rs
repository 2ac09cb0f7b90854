//! SignalR hub plumbing: wire frames, transport and the subscription client

pub mod client;
pub mod protocol;
pub mod transport;

pub use client::{ClientConfig, ConnectionState, SubscriptionClient, HEARTBEAT_CHANNEL};
pub use transport::{HubConnection, HubTransport, SignalrTransport, TransportEvent};
