//! Category -> handler routing
//!
//! A `HandlerRegistry` binds each subscription category to its decoder and
//! one or more handlers. Handlers for a category run concurrently, each in
//! its own task, so one failing or panicking handler never affects the rest.
//! Each category is delivered by its own worker, off the hub read path.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::messages::{Category, FeedEvent};
use crate::metrics::HubMetrics;
use crate::traits::{FeedHandler, HandlerResult};

pub struct CategoryHandlers {
    pub category: Category,
    pub handlers: Vec<Arc<dyn FeedHandler>>,
}

/// Ordered category -> handlers mapping
#[derive(Default)]
pub struct HandlerRegistry {
    entries: Vec<CategoryHandlers>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`register`](Self::register)
    pub fn on(mut self, category: &str, handler: Arc<dyn FeedHandler>) -> Self {
        self.register(category, handler);
        self
    }

    /// Add a handler for `category`. Registering the same category again
    /// appends to its handler list.
    pub fn register(&mut self, category: &str, handler: Arc<dyn FeedHandler>) {
        match self
            .entries
            .iter_mut()
            .find(|e| e.category.name().eq_ignore_ascii_case(category))
        {
            Some(entry) => entry.handlers.push(handler),
            None => self.entries.push(CategoryHandlers {
                category: Category::from_name(category),
                handlers: vec![handler],
            }),
        }
    }

    /// Case-insensitive lookup by category name
    pub fn get(&self, category: &str) -> Option<&CategoryHandlers> {
        self.entries
            .iter()
            .find(|e| e.category.name().eq_ignore_ascii_case(category))
    }

    pub fn iter(&self) -> impl Iterator<Item = &CategoryHandlers> {
        self.entries.iter()
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.category.name())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Channel list for one connection cycle: `{category}_{symbol}` for every
    /// symbol of a parameterized category, the bare category otherwise.
    pub fn channels(&self, markets: &HashMap<String, Vec<String>>) -> Vec<String> {
        let mut channels = Vec::new();
        for category in self.categories() {
            let symbols = markets
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(category))
                .map(|(_, symbols)| symbols);
            match symbols {
                Some(symbols) => {
                    channels.extend(symbols.iter().map(|s| format!("{}_{}", category, s)))
                }
                None => channels.push(category.to_string()),
            }
        }
        channels
    }
}

/// Run every handler on `event` concurrently and wait for all of them.
/// Returns the number of handlers that failed.
pub async fn fan_out(
    category: &str,
    event: Arc<FeedEvent>,
    handlers: &[Arc<dyn FeedHandler>],
    metrics: &HubMetrics,
) -> usize {
    let tasks: Vec<_> = handlers
        .iter()
        .map(|handler| {
            let handler = Arc::clone(handler);
            let event = Arc::clone(&event);
            tokio::spawn(async move { handler.handle(event).await })
        })
        .collect();

    let mut failures = 0;
    for (index, task) in tasks.into_iter().enumerate() {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(category, handler = index, error = %e, "Feed handler failed");
                metrics.inc_handler_error(category);
                failures += 1;
            }
            Err(e) => {
                error!(category, handler = index, error = %e, "Feed handler panicked");
                metrics.inc_handler_error(category);
                failures += 1;
            }
        }
    }
    failures
}

/// Delivery queues keyed by lowercased category name
pub type CategoryQueues = HashMap<String, mpsc::UnboundedSender<Arc<FeedEvent>>>;

/// Start one delivery worker per registered category.
///
/// A worker fans out its events in arrival order, so a slow handler only
/// delays later events of the same category. Workers drain their queue and
/// exit once every sender is dropped.
pub fn spawn_category_workers(registry: &HandlerRegistry, metrics: &HubMetrics) -> CategoryQueues {
    registry
        .iter()
        .map(|entry| {
            let (tx, mut rx) = mpsc::unbounded_channel::<Arc<FeedEvent>>();
            let category = entry.category.name().to_string();
            let handlers = entry.handlers.clone();
            let metrics = metrics.clone();
            let key = category.to_ascii_lowercase();
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    fan_out(&category, event, &handlers, &metrics).await;
                }
                debug!(category = %category, "Category worker finished");
            });
            (key, tx)
        })
        .collect()
}

/// Adapter so closures can be registered as handlers
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> FeedHandler for FnHandler<F>
where
    F: Fn(Arc<FeedEvent>) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, event: Arc<FeedEvent>) -> HandlerResult {
        (self.0)(event).await
    }
}

pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn FeedHandler>
where
    F: Fn(Arc<FeedEvent>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler(f))
}
