//! End-to-end query lifecycle through the public API

mod common;

use cfdi_reporter::{
    CfdiMeta, CfdiRecord, Config, DownloadService, Error, Event, FromCfdiMeta, PortalError,
    SatDownloader, Status,
};
use common::{
    MemoryPortal, collect_events_until, fast_config, invoices, march_parameters, statuses_of,
    wait_settled, xml_for,
};
use std::sync::Arc;
use std::time::Duration;

/// A consumer's own stored representation of a listed invoice
#[derive(Debug)]
struct StoredInvoice {
    meta: CfdiMeta,
    archived: bool,
}

impl CfdiRecord for StoredInvoice {
    fn meta(&self) -> &CfdiMeta {
        &self.meta
    }
}

impl FromCfdiMeta for StoredInvoice {
    fn from_cfdi_meta(meta: CfdiMeta) -> Self {
        Self {
            meta,
            archived: false,
        }
    }
}

fn downloader(portal: MemoryPortal) -> (SatDownloader<MemoryPortal>, Arc<MemoryPortal>) {
    let portal = Arc::new(portal);
    let downloader = SatDownloader::new(Arc::clone(&portal), fast_config()).unwrap();
    (downloader, portal)
}

#[tokio::test]
async fn three_invoices_are_listed_and_resolved() {
    let (downloader, portal) = downloader(MemoryPortal::new(invoices(3)));
    let mut events = downloader.subscribe();

    let query = downloader.submit(march_parameters()).await.unwrap();
    assert_eq!(query.status(), Status::EnEspera);
    assert_eq!(query.parameters().rfc, "BBB020202BBB");

    assert_eq!(wait_settled(&query).await, Status::Completado);
    assert_eq!(query.total_results(), 3);
    assert_eq!(query.pages(), 1);
    assert!(query.has_results());

    let stored: Vec<StoredInvoice> = query.results_as(1).unwrap();
    assert_eq!(stored.len(), 3);
    assert!(stored.iter().all(|s| !s.archived));
    for (record, expected) in stored.iter().zip(&portal.documents) {
        assert_eq!(record.folio(), expected.folio);
        assert_eq!(
            query.cfdi_xml_for(record).await.unwrap(),
            query.cfdi_xml(record.folio()).await.unwrap()
        );
        assert_eq!(
            query.cfdi_xml(expected.folio).await.unwrap(),
            Some(xml_for(expected))
        );
    }
    assert!(stored[2].meta().is_cancelled());

    let totals = query.results_with(1, |cfdi| cfdi.total).unwrap();
    assert_eq!(totals, vec![1160.0, 2320.0, 3480.0]);

    let folio = query.folio();
    let events = collect_events_until(&mut events, Duration::from_secs(1), |e| {
        matches!(e, Event::StatusChanged { status: Status::Completado, .. })
    })
    .await;
    assert_eq!(
        statuses_of(&events, folio),
        vec![Status::EnProceso, Status::Descargando, Status::Completado]
    );
}

#[tokio::test]
async fn same_minute_limit_is_recovered_by_splitting() {
    let portal = MemoryPortal::new(invoices(4)).then_count(Err(PortalError::SameMinuteLimit));
    let (downloader, _portal) = downloader(portal);

    let query = downloader.submit(march_parameters()).await.unwrap();
    assert_eq!(wait_settled(&query).await, Status::Fallo500MismoHorario);
    assert!(query.is_failure());
    assert!(query.is_completed());
    assert!(query.is_finished());
    assert!(matches!(
        query.results(1),
        Err(Error::InsufficientResults { page: 1, pages: 0 })
    ));

    let (left, right) = query.parameters().split().unwrap();
    let left = downloader.submit(left).await.unwrap();
    let right = downloader.submit(right).await.unwrap();
    assert_eq!(wait_settled(&left).await, Status::Completado);
    assert_eq!(wait_settled(&right).await, Status::Completado);
}

#[tokio::test]
async fn one_of_ten_xmls_missing_completes_con_faltantes() {
    let portal = MemoryPortal::new(invoices(10))
        .override_xml(4, Err(PortalError::Rejected("document not found".into())));
    let (downloader, portal) = downloader(portal);

    let query = downloader.submit(march_parameters()).await.unwrap();
    assert_eq!(wait_settled(&query).await, Status::CompletadoConFaltantes);
    assert!(query.is_completed());
    assert!(!query.is_failure());

    let mut found = 0;
    for cfdi in query.results(1).unwrap() {
        match query.cfdi_xml(cfdi.folio).await {
            Ok(Some(_)) => found += 1,
            Err(Error::XmlNotFound { folio, .. }) => assert_eq!(folio, portal.documents[4].folio),
            other => panic!("unexpected XML answer {other:?}"),
        }
    }
    assert_eq!(found, 9);
}

#[tokio::test]
async fn repetition_hands_out_a_fresh_query() {
    let portal =
        MemoryPortal::new(invoices(2)).then_count(Err(PortalError::Resubmit("token expired".into())));
    let (downloader, _portal) = downloader(portal);

    let query = downloader.submit(march_parameters()).await.unwrap();
    assert_eq!(wait_settled(&query).await, Status::Repetir);
    assert!(!query.has_results());
    assert!(query.cfdi(cfdi_reporter::Folio::random()).is_none());

    let replacement = downloader.repeat(query.folio()).await.unwrap();
    assert_ne!(replacement.folio(), query.folio());
    assert_eq!(wait_settled(&replacement).await, Status::Completado);
    assert_eq!(replacement.results(1).unwrap().len(), 2);
    assert_eq!(
        downloader.query(replacement.folio()).await.unwrap().folio(),
        replacement.folio()
    );
}

#[tokio::test]
async fn large_listing_is_paged() {
    let mut config = fast_config();
    config.pagination.page_size = 50;
    let portal = Arc::new(MemoryPortal::new(invoices(120)));
    let downloader = SatDownloader::new(Arc::clone(&portal), config).unwrap();

    let query = downloader.submit(march_parameters()).await.unwrap();
    assert_eq!(wait_settled(&query).await, Status::Completado);

    assert_eq!(query.page_size(), 50);
    assert_eq!(query.pages(), 3);
    let all: Vec<CfdiMeta> = (1..=query.pages())
        .flat_map(|page| query.results(page).unwrap())
        .collect();
    assert_eq!(all, portal.documents);
    assert!(query.results(0).is_err());
    assert!(query.results(4).is_err());
}

#[tokio::test]
async fn shutdown_stops_new_submissions() {
    let (downloader, _portal) = downloader(MemoryPortal::new(invoices(1)));
    downloader.shutdown().await.unwrap();

    assert!(matches!(
        downloader.submit(march_parameters()).await,
        Err(Error::ShuttingDown)
    ));
}

#[test]
fn default_config_is_valid() {
    Config::default().validate().unwrap();
}
