//! Outer control loop
//!
//! Runs one hub session per cycle and races it against stop/restart
//! requests. A session that ends on its own is fatal; a restart tears the
//! session down and starts the next cycle.

use bxfeed_middleware::CallOptions;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::accessors::RestAccessors;
use crate::dispatch::HandlerRegistry;
use crate::error::{ConnectorError, ExchangeError};
use crate::hub::{HubTransport, SubscriptionClient};
use crate::messages::{Balance, Order, Ticker};
use crate::traits::ExchangeApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Stop,
    Restart,
}

pub struct FeedOrchestrator<T: HubTransport, A: ExchangeApi> {
    client: SubscriptionClient<T>,
    registry: Arc<HandlerRegistry>,
    markets: HashMap<String, Vec<String>>,
    accessors: RestAccessors<A>,
    control: watch::Sender<Option<Control>>,
}

impl<T: HubTransport, A: ExchangeApi> FeedOrchestrator<T, A> {
    pub fn new(
        client: SubscriptionClient<T>,
        registry: HandlerRegistry,
        markets: HashMap<String, Vec<String>>,
        accessors: RestAccessors<A>,
    ) -> Self {
        let (control, _) = watch::channel(None);
        Self {
            client,
            registry: Arc::new(registry),
            markets,
            accessors,
            control,
        }
    }

    pub fn client(&self) -> &SubscriptionClient<T> {
        &self.client
    }

    pub fn accessors(&self) -> &RestAccessors<A> {
        &self.accessors
    }

    /// End `run` after tearing down the current session
    pub fn stop(&self) {
        self.control.send_replace(Some(Control::Stop));
    }

    /// Tear down the current session and start a new one
    pub fn restart(&self) {
        self.control.send_modify(|pending| {
            // never downgrade a pending stop
            if *pending != Some(Control::Stop) {
                *pending = Some(Control::Restart);
            }
        });
    }

    pub async fn run(&self) -> Result<(), ConnectorError> {
        loop {
            let mut stop_pending = false;
            self.control.send_modify(|pending| {
                stop_pending = *pending == Some(Control::Stop);
                if !stop_pending {
                    *pending = None;
                }
            });
            if stop_pending {
                info!("Stop requested before session start");
                return Ok(());
            }

            let channels = self.registry.channels(&self.markets);
            info!(channels = channels.len(), "Starting feed cycle");
            let mut control_rx = self.control.subscribe();
            let listen = self.client.listen(channels, Arc::clone(&self.registry));
            tokio::pin!(listen);

            let control = tokio::select! {
                biased;
                result = &mut listen => {
                    let err = match result {
                        Ok(()) => ConnectorError::Disconnected(
                            "hub session ended without a stop request".to_string(),
                        ),
                        Err(e) => e,
                    };
                    error!(error = %err, "Feed session failed");
                    return Err(err);
                }
                control = control_rx.wait_for(Option::is_some) => {
                    match control {
                        Ok(control) => (*control).unwrap_or(Control::Stop),
                        Err(_) => Control::Stop,
                    }
                }
            };

            info!(?control, "Control signal received");
            self.client.stop();
            if let Err(e) = listen.await {
                warn!(error = %e, "Session ended with error during shutdown");
            }

            match control {
                Control::Stop => {
                    info!("Feed stopped");
                    return Ok(());
                }
                Control::Restart => info!("Restarting feed"),
            }
        }
    }

    pub async fn balances(
        &self,
        skip_empty: bool,
        options: CallOptions,
    ) -> Result<Vec<Balance>, ExchangeError> {
        self.accessors.balances(skip_empty, options).await
    }

    pub async fn orders(
        &self,
        opened: bool,
        closed: bool,
        limit: usize,
        options: CallOptions,
    ) -> Result<Vec<Order>, ExchangeError> {
        self.accessors.orders(opened, closed, limit, options).await
    }

    pub async fn tickers(&self, options: CallOptions) -> Result<Vec<Ticker>, ExchangeError> {
        self.accessors.tickers(options).await
    }
}
