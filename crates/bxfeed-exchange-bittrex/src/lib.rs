//! Bittrex v3 REST client behind the `ExchangeApi` seam

pub mod client;
pub mod types;

pub use client::BittrexClient;
