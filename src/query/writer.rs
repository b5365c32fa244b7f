//! The single writer of a query.
//!
//! Only the download service holds a [`QueryWriter`]; it is deliberately not
//! `Clone`. Every mutation checks the lifecycle first, and once the query is
//! finished or marked REPETIR nothing changes any more.

use super::{Query, Shared, XmlState};
use crate::cfdi::CfdiMeta;
use crate::error::{Error, Result};
use crate::types::{Folio, Status};
use std::collections::HashSet;
use std::sync::Arc;

/// Advances one [`Query`] through its lifecycle
pub struct QueryWriter {
    shared: Arc<Shared>,
}

impl QueryWriter {
    pub(super) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// A reader handle onto the same query
    pub fn query(&self) -> Query {
        Query {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Folio of the query being written
    pub fn folio(&self) -> Folio {
        self.shared.folio
    }

    /// Current status
    pub fn status(&self) -> Status {
        self.shared.status()
    }

    /// EN_ESPERA -> EN_PROCESO
    pub fn start(&self) -> Result<bool> {
        self.transition(Status::EnProceso)
    }

    /// Record the match count and move EN_PROCESO -> DESCARGANDO.
    ///
    /// Returns the resulting page count.
    pub fn begin_download(&self, total: u64) -> Result<u32> {
        self.ensure_open()?;
        let current = self.status();
        if !current.can_transition_to(Status::Descargando) {
            return Err(self.invalid_transition(current, Status::Descargando));
        }

        let pages = page_count(total, self.shared.page_size).ok_or_else(|| {
            self.invalid_update(format!("{total} results do not fit the page index"))
        })?;

        {
            let mut set = self.shared.write();
            if let Some(known) = set.total {
                if known != total {
                    return Err(self.invalid_update(format!(
                        "total already known as {known}, refusing {total}"
                    )));
                }
            }
            set.total = Some(total);
            set.pages = pages;
        }

        self.shared.status.send_replace(Status::Descargando);
        tracing::info!(folio = %self.folio(), total, pages, "Result count known");
        Ok(pages)
    }

    /// Publish the documents of the 1-based `page`.
    ///
    /// Pages must be full except the last one, may be published once, and may
    /// not repeat a document folio already seen in this query.
    pub fn publish_page(&self, page: u32, documents: Vec<CfdiMeta>) -> Result<()> {
        self.ensure_open()?;
        if self.status() != Status::Descargando {
            return Err(self.invalid_update(format!(
                "cannot publish page {page} while {}",
                self.status()
            )));
        }

        let mut set = self.shared.write();
        let (total, pages) = (set.total.unwrap_or(0), set.pages);
        if page == 0 || page > pages {
            return Err(self.invalid_update(format!("page {page} outside 1..={pages}")));
        }
        if set.published.contains_key(&page) {
            return Err(self.invalid_update(format!("page {page} already published")));
        }

        let expected = expected_page_len(total, pages, self.shared.page_size, page);
        if documents.len() as u64 != expected {
            return Err(self.invalid_update(format!(
                "page {page} has {} documents, expected {expected}",
                documents.len()
            )));
        }

        let mut seen = HashSet::with_capacity(documents.len());
        for doc in &documents {
            if set.index.contains_key(&doc.folio) || !seen.insert(doc.folio) {
                return Err(self.invalid_update(format!(
                    "CFDI {} listed more than once",
                    doc.folio
                )));
            }
        }

        for (position, doc) in documents.iter().enumerate() {
            set.index.insert(doc.folio, (page, position));
        }
        set.published.insert(page, documents.into());

        tracing::debug!(folio = %self.folio(), page, pages, "Page published");
        Ok(())
    }

    /// Record what is known about the XML of a listed document.
    ///
    /// A missing XML may later be upgraded; available or absent ones are final.
    pub fn record_xml(&self, cfdi: Folio, state: XmlState) -> Result<()> {
        self.ensure_open()?;

        let mut set = self.shared.write();
        if !set.index.contains_key(&cfdi) {
            return Err(self.invalid_update(format!("CFDI {cfdi} is not part of this query")));
        }
        if let Some(existing) = set.xml.get(&cfdi) {
            if existing.is_settled() {
                return Err(self.invalid_update(format!("XML of CFDI {cfdi} already recorded")));
            }
        }
        set.xml.insert(cfdi, state);
        Ok(())
    }

    /// DESCARGANDO -> COMPLETADO or COMPLETADO_CON_FALTANTES.
    ///
    /// Every page must be published. Documents with no recorded XML count as
    /// missing.
    pub fn finish(&self) -> Result<Status> {
        self.ensure_open()?;
        let current = self.status();
        if current != Status::Descargando {
            return Err(self.invalid_transition(current, Status::Completado));
        }

        let missing = {
            let mut set = self.shared.write();
            if set.published.len() as u32 != set.pages {
                return Err(self.invalid_update(format!(
                    "only {} of {} pages published",
                    set.published.len(),
                    set.pages
                )));
            }

            let undownloaded: Vec<Folio> = set
                .index
                .keys()
                .filter(|folio| !set.xml.contains_key(*folio))
                .copied()
                .collect();
            for folio in undownloaded {
                set.xml
                    .insert(folio, XmlState::Missing("XML was never downloaded".into()));
            }

            set.xml
                .values()
                .filter(|state| matches!(state, XmlState::Missing(_)))
                .count()
        };

        let outcome = if missing == 0 {
            Status::Completado
        } else {
            Status::CompletadoConFaltantes
        };
        self.shared.status.send_replace(outcome);
        tracing::info!(folio = %self.folio(), status = %outcome, missing, "Query finished");
        Ok(outcome)
    }

    /// Move to one of the failure statuses
    pub fn fail(&self, status: Status) -> Result<bool> {
        if !status.is_failure() {
            return Err(self.invalid_update(format!("{status} is not a failure status")));
        }
        self.transition(status)
    }

    /// Mark the query for repetition
    pub fn request_repeat(&self) -> Result<bool> {
        self.transition(Status::Repetir)
    }

    /// Apply a plain status change. Re-asserting the current status is a no-op
    /// and returns `false`.
    fn transition(&self, next: Status) -> Result<bool> {
        let current = self.status();
        if current == next {
            return Ok(false);
        }
        if !current.can_transition_to(next) || next == Status::Descargando {
            return Err(self.invalid_transition(current, next));
        }

        self.shared.status.send_replace(next);
        tracing::info!(folio = %self.folio(), from = %current, to = %next, "Query status changed");
        Ok(true)
    }

    fn ensure_open(&self) -> Result<()> {
        let status = self.status();
        if status.is_frozen() {
            return Err(self.invalid_update(format!("query is frozen in {status}")));
        }
        Ok(())
    }

    fn invalid_transition(&self, from: Status, to: Status) -> Error {
        Error::InvalidTransition {
            folio: self.folio(),
            from,
            to,
        }
    }

    fn invalid_update(&self, reason: String) -> Error {
        Error::InvalidUpdate {
            folio: self.folio(),
            reason,
        }
    }
}

impl Drop for QueryWriter {
    fn drop(&mut self) {
        // Readers awaiting settlement must not hang on an abandoned query
        let status = self.status();
        if !status.is_frozen() {
            tracing::warn!(folio = %self.folio(), status = %status, "Query writer dropped before settling");
            self.shared.status.send_replace(Status::Fallo);
        }
    }
}

impl std::fmt::Debug for QueryWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryWriter")
            .field("folio", &self.folio())
            .field("status", &self.status())
            .finish()
    }
}

/// `ceil(total / page_size)`, or `None` if it does not fit a page index
pub(crate) fn page_count(total: u64, page_size: u32) -> Option<u32> {
    u32::try_from(total.div_ceil(u64::from(page_size.max(1)))).ok()
}

fn expected_page_len(total: u64, pages: u32, page_size: u32, page: u32) -> u64 {
    let page_size = u64::from(page_size);
    if page < pages {
        page_size
    } else {
        total - u64::from(pages - 1) * page_size
    }
}
