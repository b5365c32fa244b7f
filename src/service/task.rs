//! Per-query task: waits for a slot, polls the portal for the match count,
//! downloads every page and its XMLs, and settles the query.

use super::Portal;
use crate::cfdi::CfdiMeta;
use crate::config::Config;
use crate::error::{Error, PortalError};
use crate::query::{QueryWriter, XmlState};
use crate::retry::with_retry;
use crate::types::{Event, Folio, Status};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore, broadcast};
use tokio_util::sync::CancellationToken;

/// Everything a spawned query task owns
pub(crate) struct QueryTaskContext<P: Portal> {
    /// The single writer of the query
    pub writer: QueryWriter,
    pub portal: Arc<P>,
    pub config: Arc<Config>,
    pub event_tx: broadcast::Sender<Event>,
    /// Shared limit on queries driven at once
    pub concurrent_limit: Arc<Semaphore>,
    /// Removed from on exit so shutdown can tell when every task is gone
    pub active_queries: Arc<Mutex<HashMap<Folio, CancellationToken>>>,
    pub cancel_token: CancellationToken,
}

/// Why a query stopped before completing
enum Abort {
    Cancelled,
    Failed(Error),
}

impl From<Error> for Abort {
    fn from(e: Error) -> Self {
        Abort::Failed(e)
    }
}

impl From<PortalError> for Abort {
    fn from(e: PortalError) -> Self {
        Abort::Failed(Error::Portal(e))
    }
}

/// Drive one query to a frozen status
pub(crate) async fn run_query_task<P: Portal>(ctx: QueryTaskContext<P>) {
    let QueryTaskContext {
        writer,
        portal,
        config,
        event_tx,
        concurrent_limit,
        active_queries,
        cancel_token,
    } = ctx;
    let folio = writer.folio();

    let driver = QueryDriver {
        writer: &writer,
        portal: portal.as_ref(),
        config: config.as_ref(),
        event_tx: &event_tx,
    };

    let outcome = tokio::select! {
        biased;
        _ = cancel_token.cancelled() => Err(Abort::Cancelled),
        result = driver.drive(&concurrent_limit) => result,
    };

    if let Err(abort) = outcome {
        driver.settle_abort(abort);
    }

    active_queries.lock().await.remove(&folio);
    tracing::debug!(folio = %folio, status = %writer.status(), "Query task finished");
}

struct QueryDriver<'a, P: Portal> {
    writer: &'a QueryWriter,
    portal: &'a P,
    config: &'a Config,
    event_tx: &'a broadcast::Sender<Event>,
}

impl<P: Portal> QueryDriver<'_, P> {
    async fn drive(&self, concurrent_limit: &Semaphore) -> std::result::Result<(), Abort> {
        let _permit = concurrent_limit
            .acquire()
            .await
            .map_err(|_| Error::ShuttingDown)?;

        if self.writer.start()? {
            self.emit_status();
        }

        let total = self.count_matches().await?;
        let pages = self.writer.begin_download(total)?;
        self.emit_status();

        // Every page is listed before any XML is fetched, so a failure while
        // downloading XMLs leaves the whole listing readable
        let page_size = self.config.pagination.page_size;
        let parameters = self.writer.query().parameters().clone();
        let mut listed = Vec::new();
        for page in 1..=pages {
            let offset = u64::from(page - 1) * u64::from(page_size);
            let documents = with_retry(&self.config.retry, || {
                self.portal.list(&parameters, offset, page_size)
            })
            .await?;

            self.writer.publish_page(page, documents.clone())?;
            let _ = self.event_tx.send(Event::PageReady {
                folio: self.writer.folio(),
                page,
                pages,
            });
            listed.extend(documents);
        }

        self.download_xmls(listed).await?;

        self.writer.finish()?;
        self.emit_status();
        Ok(())
    }

    /// Ask for the match count, polling while the portal reports it pending
    async fn count_matches(&self) -> std::result::Result<u64, Abort> {
        let parameters = self.writer.query().parameters().clone();
        let polling = &self.config.polling;

        for poll in 1..=polling.max_polls {
            match with_retry(&self.config.retry, || self.portal.count(&parameters)).await {
                Ok(total) => return Ok(total),
                Err(PortalError::Pending) if poll < polling.max_polls => {
                    tracing::debug!(
                        folio = %self.writer.folio(),
                        poll,
                        max_polls = polling.max_polls,
                        "Portal still matching, polling again"
                    );
                    tokio::time::sleep(polling.interval).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(PortalError::Pending.into())
    }

    /// Fetch the XMLs of every listed document, recording each outcome
    ///
    /// Authentication and resubmission failures end the query; anything else
    /// leaves the XML missing.
    async fn download_xmls(&self, documents: Vec<CfdiMeta>) -> std::result::Result<(), Abort> {
        let portal: &P = self.portal;
        let config: &Config = self.config;
        let retry = &config.retry;

        let mut fetched = stream::iter(documents)
            .map(|doc| async move {
                let xml = with_retry(retry, || portal.fetch_xml(&doc)).await;
                (doc.folio, xml)
            })
            .buffer_unordered(self.config.xml_concurrency.max(1));

        while let Some((cfdi, xml)) = fetched.next().await {
            let state = match xml {
                Ok(Some(xml)) => XmlState::Available(xml),
                Ok(None) => XmlState::Absent,
                Err(e @ (PortalError::Authentication(_) | PortalError::Resubmit(_))) => {
                    return Err(e.into());
                }
                Err(e) => {
                    tracing::warn!(
                        folio = %self.writer.folio(),
                        cfdi = %cfdi,
                        error = %e,
                        "XML could not be downloaded"
                    );
                    let _ = self.event_tx.send(Event::XmlMissing {
                        folio: self.writer.folio(),
                        cfdi,
                        error: e.to_string(),
                    });
                    XmlState::Missing(e.to_string())
                }
            };
            self.writer.record_xml(cfdi, state)?;
        }
        Ok(())
    }

    /// Move the query to the status matching why it stopped
    fn settle_abort(&self, abort: Abort) {
        let folio = self.writer.folio();
        let current = self.writer.status();
        if current.is_frozen() {
            return;
        }

        let settled = match &abort {
            Abort::Cancelled => {
                tracing::info!(folio = %folio, "Query cancelled");
                self.writer.fail(Status::Fallo)
            }
            Abort::Failed(error) => {
                tracing::warn!(folio = %folio, status = %current, error = %error, "Query failed");
                match target_status(error, current) {
                    Status::Repetir => self.writer.request_repeat(),
                    status => self.writer.fail(status),
                }
            }
        };

        match settled {
            Ok(true) => self.emit_status(),
            Ok(false) => {}
            Err(e) => {
                tracing::error!(folio = %folio, error = %e, "Could not settle query");
            }
        }
    }

    fn emit_status(&self) {
        let _ = self.event_tx.send(Event::StatusChanged {
            folio: self.writer.folio(),
            status: self.writer.status(),
        });
    }
}

/// Status a query in `current` ends in after `error`
fn target_status(error: &Error, current: Status) -> Status {
    match error {
        Error::Portal(PortalError::Authentication(_)) => Status::FalloAutenticacion,
        Error::Portal(PortalError::SameMinuteLimit) if current == Status::EnProceso => {
            Status::Fallo500MismoHorario
        }
        Error::Portal(PortalError::Resubmit(_)) => Status::Repetir,
        _ => Status::Fallo,
    }
}
