//! Download service: creates queries and drives them against the portal.
//!
//! - `portal` - the transport seam ([`Portal`]) and the on-demand XML source
//! - `task` - the per-query driving task (polling, paging, XML download)
//!
//! [`SatDownloader`] is the single writer of every query it creates. Consumers
//! only ever receive [`Query`] reader handles.

mod portal;
mod task;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

pub use portal::Portal;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::parameters::Parameters;
use crate::query::{Query, XmlSource};
use crate::types::{Event, Folio};
use async_trait::async_trait;
use portal::PortalXmlSource;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use task::QueryTaskContext;
use tokio::sync::{Mutex, RwLock, Semaphore, broadcast};
use tokio_util::sync::CancellationToken;

/// How long shutdown waits for running queries to wind down
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between checks while waiting for running queries
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Operations a download service offers to query consumers
#[async_trait]
pub trait DownloadService: Send + Sync {
    /// Accept `parameters` and return the new query in `EN_ESPERA`
    async fn submit(&self, parameters: Parameters) -> Result<Query>;

    /// Replace a query marked `REPETIR` with a fresh one for the same parameters
    ///
    /// # Errors
    ///
    /// [`Error::QueryNotFound`] for unknown folios and [`Error::NotRepeatable`]
    /// when the query is not in `REPETIR`.
    async fn repeat(&self, folio: Folio) -> Result<Query>;

    /// Look up a query created by this service
    async fn query(&self, folio: Folio) -> Option<Query>;
}

/// Queries known to the service and the replacements issued for them
#[derive(Default)]
struct Registry {
    queries: HashMap<Folio, Query>,
    /// original folio -> replacement folio
    replacements: HashMap<Folio, Folio>,
}

/// Download service backed by a [`Portal`] (cloneable - all fields are Arc-wrapped)
pub struct SatDownloader<P: Portal> {
    pub(crate) portal: Arc<P>,
    pub(crate) config: Arc<Config>,
    pub(crate) event_tx: broadcast::Sender<Event>,
    registry: Arc<RwLock<Registry>>,
    /// Limits queries driven against the portal at the same time
    pub(crate) concurrent_limit: Arc<Semaphore>,
    /// Cancellation tokens of queries whose task is still running
    pub(crate) active_queries: Arc<Mutex<HashMap<Folio, CancellationToken>>>,
    /// Set to false during shutdown
    accepting_new: Arc<AtomicBool>,
}

impl<P: Portal> Clone for SatDownloader<P> {
    fn clone(&self) -> Self {
        Self {
            portal: Arc::clone(&self.portal),
            config: Arc::clone(&self.config),
            event_tx: self.event_tx.clone(),
            registry: Arc::clone(&self.registry),
            concurrent_limit: Arc::clone(&self.concurrent_limit),
            active_queries: Arc::clone(&self.active_queries),
            accepting_new: Arc::clone(&self.accepting_new),
        }
    }
}

impl<P: Portal> std::fmt::Debug for SatDownloader<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SatDownloader")
            .field("portal", &self.portal.name())
            .field("config", &self.config)
            .field("accepting_new", &self.accepting_new.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<P: Portal> SatDownloader<P> {
    /// Create a service over `portal`
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when the configuration does not validate.
    pub fn new(portal: Arc<P>, config: Config) -> Result<Self> {
        config.validate()?;

        let (event_tx, _rx) = broadcast::channel(config.event_buffer);
        let concurrent_limit = Arc::new(Semaphore::new(config.max_concurrent_queries));

        tracing::info!(
            portal = portal.name(),
            page_size = config.pagination.page_size,
            max_concurrent_queries = config.max_concurrent_queries,
            "SAT downloader ready"
        );

        Ok(Self {
            portal,
            config: Arc::new(config),
            event_tx,
            registry: Arc::new(RwLock::new(Registry::default())),
            concurrent_limit,
            active_queries: Arc::new(Mutex::new(HashMap::new())),
            accepting_new: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Subscribe to lifecycle events of every query this service drives
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Every query created by this service, in no particular order
    pub async fn queries(&self) -> Vec<Query> {
        self.registry.read().await.queries.values().cloned().collect()
    }

    /// Forget a settled query, releasing its pages and XMLs
    ///
    /// Reader handles already given out keep working. Replacement links to or
    /// from the query are dropped with it.
    ///
    /// # Errors
    ///
    /// [`Error::QueryNotFound`] for unknown folios and [`Error::QueryActive`]
    /// while the query can still change.
    pub async fn remove(&self, folio: Folio) -> Result<Query> {
        let mut registry = self.registry.write().await;
        let status = registry
            .queries
            .get(&folio)
            .map(Query::status)
            .ok_or(Error::QueryNotFound(folio))?;
        if !status.is_frozen() {
            return Err(Error::QueryActive { folio, status });
        }

        let query = registry
            .queries
            .remove(&folio)
            .ok_or(Error::QueryNotFound(folio))?;
        registry
            .replacements
            .retain(|original, replacement| *original != folio && *replacement != folio);

        tracing::debug!(folio = %folio, status = %status, "Query removed");
        Ok(query)
    }

    /// Stop accepting queries and cancel the running ones
    ///
    /// Cancelled queries end in `FALLO`. Waits up to 30 seconds for their
    /// tasks to wind down.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");
        self.accepting_new.store(false, Ordering::SeqCst);

        {
            let active = self.active_queries.lock().await;
            tracing::debug!(active_count = active.len(), "Cancelling active queries");
            for token in active.values() {
                token.cancel();
            }
        }

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.wait_for_active_queries()).await {
            Ok(()) => tracing::info!("All active queries stopped"),
            Err(_) => tracing::warn!("Timeout waiting for queries to stop, proceeding with shutdown"),
        }

        let _ = self.event_tx.send(Event::Shutdown);
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    async fn wait_for_active_queries(&self) {
        loop {
            let active_count = self.active_queries.lock().await.len();
            if active_count == 0 {
                return;
            }
            tracing::debug!(active_count, "Waiting for active queries to stop");
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }
    }

    /// Create, register and spawn a query while the caller holds the registry
    async fn spawn_query(&self, registry: &mut Registry, parameters: Parameters) -> Result<Query> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        parameters.validate()?;

        let xml_source: Arc<dyn XmlSource> = Arc::new(PortalXmlSource {
            portal: Arc::clone(&self.portal),
            retry: self.config.retry.clone(),
        });
        let (query, writer) = Query::new(
            parameters,
            self.config.pagination.page_size,
            Some(xml_source),
        );
        let folio = query.folio();

        let cancel_token = CancellationToken::new();
        {
            // Shutdown cancels under this lock, so a token is either refused
            // here or reached by its cancel loop
            let mut active = self.active_queries.lock().await;
            if !self.accepting_new.load(Ordering::SeqCst) {
                return Err(Error::ShuttingDown);
            }
            active.insert(folio, cancel_token.clone());
        }
        registry.queries.insert(folio, query.clone());

        tracing::info!(
            folio = %folio,
            rfc = %query.parameters().rfc,
            start = %query.parameters().start,
            end = %query.parameters().end,
            "Query submitted"
        );
        let _ = self.event_tx.send(Event::Submitted { folio });

        let ctx = QueryTaskContext {
            writer,
            portal: Arc::clone(&self.portal),
            config: Arc::clone(&self.config),
            event_tx: self.event_tx.clone(),
            concurrent_limit: Arc::clone(&self.concurrent_limit),
            active_queries: Arc::clone(&self.active_queries),
            cancel_token,
        };
        tokio::spawn(task::run_query_task(ctx));

        Ok(query)
    }
}

#[async_trait]
impl<P: Portal> DownloadService for SatDownloader<P> {
    async fn submit(&self, parameters: Parameters) -> Result<Query> {
        let mut registry = self.registry.write().await;
        self.spawn_query(&mut registry, parameters).await
    }

    async fn repeat(&self, folio: Folio) -> Result<Query> {
        // One write lock across check and insert: concurrent repeats of the
        // same folio share a single replacement
        let mut registry = self.registry.write().await;
        if let Some(query) = registry
            .replacements
            .get(&folio)
            .and_then(|replacement| registry.queries.get(replacement))
        {
            return Ok(query.clone());
        }

        let original = registry
            .queries
            .get(&folio)
            .cloned()
            .ok_or(Error::QueryNotFound(folio))?;
        let status = original.status();
        if !status.needs_repeat() {
            return Err(Error::NotRepeatable { folio, status });
        }

        let replacement = self
            .spawn_query(&mut registry, original.parameters().clone())
            .await?;
        registry.replacements.insert(folio, replacement.folio());
        drop(registry);

        tracing::info!(original = %folio, replacement = %replacement.folio(), "Query repeated");
        let _ = self.event_tx.send(Event::Repeated {
            original: folio,
            replacement: replacement.folio(),
        });
        Ok(replacement)
    }

    async fn query(&self, folio: Folio) -> Option<Query> {
        self.registry.read().await.queries.get(&folio).cloned()
    }
}
