//! # cfdi-reporter
//!
//! Query lifecycle library for bulk CFDI (Mexican electronic invoice) listings
//! from the SAT portal.
//!
//! A consumer submits [`Parameters`] (taxpayer RFC plus a date window) and gets
//! back a [`Query`]: a read-only handle that tracks the request through its
//! lifecycle, exposes the matched documents in fixed-size pages, and resolves
//! the raw XML of any listed document by folio.
//!
//! ## Design
//!
//! - **Single writer** - only the download service advances a query, through
//!   its [`QueryWriter`]; every other holder reads.
//! - **Portal-agnostic** - the SAT transport sits behind the [`Portal`] trait.
//! - **Event-driven** - consumers may subscribe to [`Event`]s or await
//!   [`Query::wait_until_settled`] instead of polling.
//!
//! ## Quick Start
//!
//! ```no_run
//! use cfdi_reporter::{Config, DownloadService, Parameters, Portal, SatDownloader, Status};
//! use std::sync::Arc;
//!
//! # async fn example<P: Portal>(portal: P) -> Result<(), Box<dyn std::error::Error>> {
//! let downloader = SatDownloader::new(Arc::new(portal), Config::default())?;
//!
//! let start = chrono::NaiveDate::from_ymd_opt(2016, 3, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
//! let end = chrono::NaiveDate::from_ymd_opt(2016, 3, 31).unwrap().and_hms_opt(23, 59, 59).unwrap();
//! let mut query = downloader.submit(Parameters::new("AAA010101AAA", start, end)).await?;
//!
//! loop {
//!     match query.wait_until_settled().await {
//!         Status::Repetir => query = downloader.repeat(query.folio()).await?,
//!         Status::Fallo500MismoHorario => {
//!             // Narrow the window with `Parameters::split` and submit both halves
//!             break;
//!         }
//!         _ => break,
//!     }
//! }
//!
//! for page in 1..=query.pages() {
//!     for cfdi in query.results(page)? {
//!         let xml = query.cfdi_xml(cfdi.folio).await?;
//!         println!("{} {} {:?}", cfdi.folio, cfdi.issuer_rfc, xml.map(|x| x.len()));
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// CFDI metadata and record traits
pub mod cfdi;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Query parameters
pub mod parameters;
/// Query state holder (decomposed into reader and writer halves)
pub mod query;
/// Retry logic with exponential backoff
pub mod retry;
/// Download service driving queries against the portal
pub mod service;
/// Core types: folios, statuses, events
pub mod types;

// Re-export commonly used types
pub use cfdi::{CfdiMeta, CfdiRecord, CfdiStatus, Effect, FromCfdiMeta};
pub use config::{Config, PaginationConfig, PollingConfig, RetryConfig};
pub use error::{Error, PortalError, Result};
pub use parameters::{Direction, Parameters, StatusFilter};
pub use query::{Query, QueryWriter, XmlSource, XmlState};
pub use service::{DownloadService, Portal, SatDownloader};
pub use types::{Event, Folio, Status};

/// Helper function to run the downloader until a termination signal arrives.
///
/// Waits for a termination signal and then calls the downloader's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown<P: Portal>(downloader: SatDownloader<P>) -> Result<()> {
    wait_for_signal().await;
    downloader.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Ok(mut only), Err(e)) | (Err(e), Ok(mut only)) => {
            tracing::warn!(error = %e, "Could not register every signal handler");
            only.recv().await;
            tracing::info!("Received termination signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
