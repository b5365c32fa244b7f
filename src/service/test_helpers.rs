//! Shared test helpers: an in-memory portal with scriptable answers.

use super::{Portal, SatDownloader};
use crate::cfdi::CfdiMeta;
use crate::cfdi::tests::sample_cfdi;
use crate::config::Config;
use crate::error::PortalError;
use crate::parameters::Parameters;
use crate::types::Folio;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Portal serving a fixed document list
///
/// `count` first drains `count_script`, then reports the number of documents.
/// Every document has an XML unless overridden in `xml_answers`.
#[derive(Default)]
pub(crate) struct ScriptedPortal {
    pub documents: Vec<CfdiMeta>,
    pub count_script: Mutex<VecDeque<Result<u64, PortalError>>>,
    pub list_error: Mutex<Option<PortalError>>,
    pub xml_answers: Mutex<HashMap<Folio, Result<Option<String>, PortalError>>>,
    /// `count` never answers
    pub hang: bool,
    pub count_calls: AtomicU32,
    pub list_calls: AtomicU32,
    pub xml_calls: AtomicU32,
}

impl ScriptedPortal {
    /// Portal with `n` matching documents
    pub fn with_documents(n: u32) -> Self {
        Self {
            documents: (1..=n).map(sample_cfdi).collect(),
            ..Self::default()
        }
    }

    /// Answer the next `count` calls with `answers`, in order
    pub fn script_count(self, answers: impl IntoIterator<Item = Result<u64, PortalError>>) -> Self {
        self.count_script.lock().unwrap().extend(answers);
        self
    }

    /// Fail every `list` call
    pub fn fail_list(self, error: PortalError) -> Self {
        *self.list_error.lock().unwrap() = Some(error);
        self
    }

    /// Override the XML answer of the document at `index`
    pub fn xml_answer(self, index: usize, answer: Result<Option<String>, PortalError>) -> Self {
        let folio = self.documents[index].folio;
        self.xml_answers.lock().unwrap().insert(folio, answer);
        self
    }

    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }
}

/// The XML a [`ScriptedPortal`] serves for `folio` by default
pub(crate) fn sample_xml(folio: Folio) -> String {
    format!(r#"<cfdi:Comprobante Version="3.3"><tfd:TimbreFiscalDigital UUID="{folio}"/></cfdi:Comprobante>"#)
}

#[async_trait]
impl Portal for ScriptedPortal {
    async fn count(&self, _parameters: &Parameters) -> Result<u64, PortalError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some(answer) = self.count_script.lock().unwrap().pop_front() {
            return answer;
        }
        Ok(self.documents.len() as u64)
    }

    async fn list(
        &self,
        _parameters: &Parameters,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<CfdiMeta>, PortalError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.list_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self
            .documents
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn fetch_xml(&self, cfdi: &CfdiMeta) -> Result<Option<String>, PortalError> {
        self.xml_calls.fetch_add(1, Ordering::SeqCst);
        match self.xml_answers.lock().unwrap().get(&cfdi.folio) {
            Some(answer) => answer.clone(),
            None => Ok(Some(sample_xml(cfdi.folio))),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Config with no waiting between polls or retries
pub(crate) fn test_config() -> Config {
    let mut config = Config::default();
    config.polling.interval = Duration::from_millis(1);
    config.polling.max_polls = 5;
    config.retry.max_attempts = 2;
    config.retry.initial_delay = Duration::from_millis(1);
    config.retry.max_delay = Duration::from_millis(5);
    config.retry.jitter = false;
    config
}

/// Helper to create a downloader over `portal` with [`test_config`]
pub(crate) fn create_test_downloader(portal: ScriptedPortal) -> (SatDownloader<ScriptedPortal>, Arc<ScriptedPortal>) {
    let portal = Arc::new(portal);
    let downloader = SatDownloader::new(Arc::clone(&portal), test_config()).unwrap();
    (downloader, portal)
}

/// Parameters for one day of received documents
pub(crate) fn sample_parameters() -> Parameters {
    let day = NaiveDate::from_ymd_opt(2016, 3, 1).unwrap();
    Parameters::new(
        "AAA010101AAA",
        day.and_hms_opt(0, 0, 0).unwrap(),
        day.and_hms_opt(23, 59, 59).unwrap(),
    )
}
