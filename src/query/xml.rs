//! XML resolution state and the callback into the download service

use crate::cfdi::CfdiMeta;
use crate::error::PortalError;
use crate::types::Folio;
use async_trait::async_trait;

/// What is known about the XML of one listed document
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum XmlState {
    /// Downloaded and stored
    Available(String),
    /// The portal has no XML for this document (e.g. cancelled before issue)
    Absent,
    /// Expected but could not be retrieved
    Missing(String),
}

impl XmlState {
    /// Final states; only a missing XML may be replaced by a later download
    pub(crate) fn is_settled(&self) -> bool {
        !matches!(self, XmlState::Missing(_))
    }
}

/// Fetches a document XML on demand
///
/// Implemented by the download service and handed to each query it creates,
/// so a reader asking for an XML the service has not downloaded yet can get
/// it without waiting for the whole query to finish.
#[async_trait]
pub trait XmlSource: Send + Sync {
    /// Fetch the XML of `cfdi`, listed by query `query`
    ///
    /// `Ok(None)` means the portal legitimately has no XML for the document.
    async fn fetch_xml(&self, query: Folio, cfdi: &CfdiMeta) -> Result<Option<String>, PortalError>;
}
