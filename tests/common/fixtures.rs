//! In-memory portal and sample documents

use async_trait::async_trait;
use cfdi_reporter::{
    CfdiMeta, CfdiStatus, Config, Effect, Folio, Parameters, Portal, PortalError,
};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

pub const ISSUER_RFC: &str = "AAA010101AAA";
pub const RECEIVER_RFC: &str = "BBB020202BBB";

pub fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2016, 3, day)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

/// Received documents for March 2016
pub fn march_parameters() -> Parameters {
    Parameters::new(
        RECEIVER_RFC.to_lowercase(),
        at(1, 0, 0),
        NaiveDate::from_ymd_opt(2016, 3, 31)
            .unwrap()
            .and_hms_opt(23, 59, 59)
            .unwrap(),
    )
}

/// `n` invoices issued one minute apart, the last one cancelled
pub fn invoices(n: u32) -> Vec<CfdiMeta> {
    (0..n)
        .map(|i| {
            let issued_at = at(1 + i / 1440, (i / 60) % 24, i % 60);
            let cancelled = i + 1 == n;
            CfdiMeta {
                folio: Folio::random(),
                issuer_rfc: ISSUER_RFC.into(),
                issuer_name: "Proveedora del Norte SA de CV".into(),
                receiver_rfc: RECEIVER_RFC.into(),
                receiver_name: "Comercializadora Bajío".into(),
                issued_at,
                certified_at: Some(issued_at + chrono::Duration::seconds(30)),
                pac_rfc: Some("SAT970701NN3".into()),
                total: 1160.0 * f64::from(i + 1),
                effect: Effect::Income,
                status: if cancelled {
                    CfdiStatus::Cancelled
                } else {
                    CfdiStatus::Active
                },
                cancelled_at: cancelled.then(|| issued_at + chrono::Duration::days(1)),
            }
        })
        .collect()
}

pub fn xml_for(cfdi: &CfdiMeta) -> String {
    format!(
        r#"<cfdi:Comprobante Total="{}"><cfdi:Emisor Rfc="{}"/><tfd:TimbreFiscalDigital UUID="{}"/></cfdi:Comprobante>"#,
        cfdi.total, cfdi.issuer_rfc, cfdi.folio
    )
}

/// Portal backed by a document list with scriptable count answers and
/// per-document XML overrides
#[derive(Default)]
pub struct MemoryPortal {
    pub documents: Vec<CfdiMeta>,
    pub count_answers: Mutex<VecDeque<Result<u64, PortalError>>>,
    pub xml_overrides: Mutex<HashMap<Folio, Result<Option<String>, PortalError>>>,
}

impl MemoryPortal {
    pub fn new(documents: Vec<CfdiMeta>) -> Self {
        Self {
            documents,
            ..Self::default()
        }
    }

    pub fn then_count(self, answer: Result<u64, PortalError>) -> Self {
        self.count_answers.lock().unwrap().push_back(answer);
        self
    }

    pub fn override_xml(self, index: usize, answer: Result<Option<String>, PortalError>) -> Self {
        let folio = self.documents[index].folio;
        self.xml_overrides.lock().unwrap().insert(folio, answer);
        self
    }
}

#[async_trait]
impl Portal for MemoryPortal {
    async fn count(&self, _parameters: &Parameters) -> Result<u64, PortalError> {
        match self.count_answers.lock().unwrap().pop_front() {
            Some(answer) => answer,
            None => Ok(self.documents.len() as u64),
        }
    }

    async fn list(
        &self,
        _parameters: &Parameters,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<CfdiMeta>, PortalError> {
        Ok(self
            .documents
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn fetch_xml(&self, cfdi: &CfdiMeta) -> Result<Option<String>, PortalError> {
        match self.xml_overrides.lock().unwrap().get(&cfdi.folio) {
            Some(answer) => answer.clone(),
            None => Ok(Some(xml_for(cfdi))),
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Config that never sleeps for long
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.polling.interval = Duration::from_millis(1);
    config.retry.initial_delay = Duration::from_millis(1);
    config.retry.max_delay = Duration::from_millis(2);
    config.retry.jitter = false;
    config
}
