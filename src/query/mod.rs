//! The query state holder.
//!
//! A [`Query`] is a passive, cheaply cloneable handle over state that only its
//! [`QueryWriter`] mutates. The writer belongs to the download service; every
//! other holder is a reader.
//!
//! - `writer` - status transitions and incremental population
//! - `xml` - XML resolution state and the on-demand fetch seam
//!
//! Pages are published whole (one `Arc<[CfdiMeta]>` per page), so a reader
//! either sees a page completely or gets [`Error::InsufficientResults`].

mod writer;
mod xml;


pub use writer::QueryWriter;
pub use xml::{XmlSource, XmlState};

use crate::cfdi::{CfdiMeta, CfdiRecord, FromCfdiMeta};
use crate::error::{Error, Result};
use crate::parameters::Parameters;
use crate::types::{Folio, Status};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;

/// Results and XML bookkeeping, guarded by a single lock
#[derive(Default)]
pub(crate) struct ResultSet {
    /// `None` until the portal reports the match count
    pub(crate) total: Option<u64>,
    pub(crate) pages: u32,
    pub(crate) published: BTreeMap<u32, Arc<[CfdiMeta]>>,
    /// document folio -> (page, position within page)
    pub(crate) index: HashMap<Folio, (u32, usize)>,
    pub(crate) xml: HashMap<Folio, XmlState>,
}

impl ResultSet {
    fn lookup(&self, folio: Folio) -> Option<&CfdiMeta> {
        let (page, position) = self.index.get(&folio)?;
        self.published.get(page)?.get(*position)
    }
}

pub(crate) struct Shared {
    pub(crate) folio: Folio,
    pub(crate) parameters: Parameters,
    pub(crate) page_size: u32,
    pub(crate) status: watch::Sender<Status>,
    pub(crate) results: RwLock<ResultSet>,
    pub(crate) xml_source: Option<Arc<dyn XmlSource>>,
}

impl Shared {
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, ResultSet> {
        // A panicking writer cannot leave a page half-inserted, so poisoned
        // state is still consistent.
        self.results.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, ResultSet> {
        self.results.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn status(&self) -> Status {
        *self.status.borrow()
    }
}

/// A query submitted to the SAT portal
///
/// Cloning is cheap; all clones observe the same state.
#[derive(Clone)]
pub struct Query {
    shared: Arc<Shared>,
}

impl Query {
    /// Create a query in `EN_ESPERA` and the single writer that advances it.
    ///
    /// `page_size` is the fixed number of documents per page (0 is treated as 1).
    /// `xml_source` is consulted for XMLs the writer has not recorded yet.
    pub fn new(
        parameters: Parameters,
        page_size: u32,
        xml_source: Option<Arc<dyn XmlSource>>,
    ) -> (Query, QueryWriter) {
        let (status, _) = watch::channel(Status::EnEspera);
        let shared = Arc::new(Shared {
            folio: Folio::random(),
            parameters,
            page_size: page_size.max(1),
            status,
            results: RwLock::new(ResultSet::default()),
            xml_source,
        });

        let query = Query {
            shared: Arc::clone(&shared),
        };
        (query, QueryWriter::new(shared))
    }

    /// The parameters this query was created with
    pub fn parameters(&self) -> &Parameters {
        &self.shared.parameters
    }

    /// Unique identifier assigned at creation
    pub fn folio(&self) -> Folio {
        self.shared.folio
    }

    /// Current status
    pub fn status(&self) -> Status {
        self.shared.status()
    }

    /// Ended with one of the five terminal statuses
    pub fn is_finished(&self) -> bool {
        self.status().is_finished()
    }

    /// Ended with a failure status
    pub fn is_failure(&self) -> bool {
        self.status().is_failure()
    }

    /// Ended with an outcome, success or failure
    pub fn is_completed(&self) -> bool {
        self.status().is_completed()
    }

    /// Must be discarded and repeated through the download service
    pub fn needs_repeat(&self) -> bool {
        self.status().needs_repeat()
    }

    /// Documents matched by the portal, 0 until known
    pub fn total_results(&self) -> u64 {
        self.shared.read().total.unwrap_or(0)
    }

    /// Number of result pages, 0 when there are no results
    pub fn pages(&self) -> u32 {
        self.shared.read().pages
    }

    /// Fixed number of documents per page
    pub fn page_size(&self) -> u32 {
        self.shared.page_size
    }

    /// Subscribe to status changes
    pub fn watch_status(&self) -> watch::Receiver<Status> {
        self.shared.status.subscribe()
    }

    /// Wait until the query is finished or needs repeating, returning that status
    pub async fn wait_until_settled(&self) -> Status {
        let mut rx = self.shared.status.subscribe();
        match rx.wait_for(Status::is_frozen).await {
            Ok(status) => *status,
            // The sender lives in `shared`, which we hold
            Err(_) => self.status(),
        }
    }

    /// Documents of the 1-based `page`
    ///
    /// # Errors
    ///
    /// [`Error::InsufficientResults`] when the page is 0, beyond [`pages`](Self::pages),
    /// not published yet, or the query needs repeating.
    pub fn results(&self, page: u32) -> Result<Vec<CfdiMeta>> {
        Ok(self.page(page)?.to_vec())
    }

    /// Documents of `page`, each passed through `factory`
    pub fn results_with<T, F>(&self, page: u32, factory: F) -> Result<Vec<T>>
    where
        F: FnMut(&CfdiMeta) -> T,
    {
        Ok(self.page(page)?.iter().map(factory).collect())
    }

    /// Documents of `page` as the caller's own representation
    pub fn results_as<T: FromCfdiMeta>(&self, page: u32) -> Result<Vec<T>> {
        Ok(self
            .page(page)?
            .iter()
            .cloned()
            .map(T::from_cfdi_meta)
            .collect())
    }

    /// Whether at least one page can be read right now
    pub fn has_results(&self) -> bool {
        !self.needs_repeat() && !self.shared.read().published.is_empty()
    }

    /// Metadata of a document of this query, `None` if the folio is unknown here
    pub fn cfdi(&self, folio: Folio) -> Option<CfdiMeta> {
        if self.needs_repeat() {
            return None;
        }
        self.shared.read().lookup(folio).cloned()
    }

    /// Raw XML of the document with `folio`
    ///
    /// Returns `Ok(None)` when the document legitimately has no XML.
    ///
    /// # Errors
    ///
    /// [`Error::XmlNotFound`] when an XML was expected but cannot be retrieved,
    /// including folios that are not documents of this query.
    pub async fn cfdi_xml(&self, folio: Folio) -> Result<Option<String>> {
        let (meta, state) = {
            let set = self.shared.read();
            let meta = if self.needs_repeat() {
                None
            } else {
                set.lookup(folio).cloned()
            };
            (meta, set.xml.get(&folio).cloned())
        };

        let Some(meta) = meta else {
            return Err(Error::XmlNotFound {
                folio,
                reason: format!("not a document of query {}", self.folio()),
            });
        };

        match state {
            Some(XmlState::Available(xml)) => Ok(Some(xml)),
            Some(XmlState::Absent) => Ok(None),
            Some(XmlState::Missing(reason)) => Err(Error::XmlNotFound { folio, reason }),
            None => self.fetch_on_demand(&meta).await,
        }
    }

    /// Raw XML of `record`; same answer as `cfdi_xml(record.folio())`
    pub async fn cfdi_xml_for<R: CfdiRecord + ?Sized>(&self, record: &R) -> Result<Option<String>> {
        self.cfdi_xml(record.folio()).await
    }

    fn page(&self, page: u32) -> Result<Arc<[CfdiMeta]>> {
        let repeat = self.needs_repeat();
        let set = self.shared.read();
        let insufficient = Error::InsufficientResults {
            page,
            pages: set.pages,
        };

        if repeat || page == 0 || page > set.pages {
            return Err(insufficient);
        }
        set.published.get(&page).cloned().ok_or(insufficient)
    }

    async fn fetch_on_demand(&self, meta: &CfdiMeta) -> Result<Option<String>> {
        let Some(source) = self.shared.xml_source.as_ref() else {
            return Err(Error::XmlNotFound {
                folio: meta.folio,
                reason: "XML has not been downloaded yet".into(),
            });
        };

        tracing::debug!(folio = %self.folio(), cfdi = %meta.folio, "Fetching XML on demand");
        source
            .fetch_xml(self.folio(), meta)
            .await
            .map_err(|e| Error::XmlNotFound {
                folio: meta.folio,
                reason: e.to_string(),
            })
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("folio", &self.folio())
            .field("status", &self.status())
            .field("total_results", &self.total_results())
            .field("pages", &self.pages())
            .finish()
    }
}
