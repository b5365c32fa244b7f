//! Transport seam towards the SAT portal

use crate::cfdi::CfdiMeta;
use crate::config::RetryConfig;
use crate::error::PortalError;
use crate::parameters::Parameters;
use crate::query::XmlSource;
use crate::retry::with_retry;
use crate::types::Folio;
use async_trait::async_trait;
use std::sync::Arc;

/// Trait for talking to the SAT CFDI metadata portal
///
/// The crate ships no implementation: authentication, sessions and the wire
/// format live behind this trait. [`SatDownloader`](crate::SatDownloader)
/// drives queries through their lifecycle using only these three calls.
///
/// Failures are reported as [`PortalError`]; the service decides which ones
/// are retried and which ones end the query.
#[async_trait]
pub trait Portal: Send + Sync + 'static {
    /// Number of documents matching `parameters`
    ///
    /// Returns [`PortalError::Pending`] while the portal is still matching and
    /// [`PortalError::SameMinuteLimit`] when the window cannot be paged.
    async fn count(&self, parameters: &Parameters) -> Result<u64, PortalError>;

    /// Up to `limit` documents starting at `offset`, in portal order
    async fn list(
        &self,
        parameters: &Parameters,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<CfdiMeta>, PortalError>;

    /// Raw XML of one document, `None` if the portal legitimately has none
    async fn fetch_xml(&self, cfdi: &CfdiMeta) -> Result<Option<String>, PortalError>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str {
        "portal"
    }
}

/// [`XmlSource`] handed to queries so readers can fetch XMLs on demand
pub(crate) struct PortalXmlSource<P: Portal> {
    pub(crate) portal: Arc<P>,
    pub(crate) retry: RetryConfig,
}

#[async_trait]
impl<P: Portal> XmlSource for PortalXmlSource<P> {
    async fn fetch_xml(&self, query: Folio, cfdi: &CfdiMeta) -> Result<Option<String>, PortalError> {
        tracing::debug!(folio = %query, cfdi = %cfdi.folio, portal = self.portal.name(), "On-demand XML fetch");
        with_retry(&self.retry, || self.portal.fetch_xml(cfdi)).await
    }
}
