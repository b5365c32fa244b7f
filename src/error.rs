//! Error types for cfdi-reporter
//!
//! Two families of failure exist in this crate:
//! - Per-call errors ([`Error::InsufficientResults`], [`Error::XmlNotFound`]) that a
//!   reader can recover from by polling again or correcting its input
//! - Whole-query outcomes (authentication failure, the same-minute limit, generic
//!   failure) which are *not* errors at all but terminal [`Status`] values
//!
//! [`PortalError`] describes what the external portal reported; the download
//! service translates it into a status or, for transient failures, retries.

use crate::types::{Folio, Status};
use thiserror::Error;

/// Result type alias for cfdi-reporter operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for cfdi-reporter
#[derive(Debug, Error)]
pub enum Error {
    /// The requested page is out of range or has not been published yet
    ///
    /// Callers distinguish "not ready" from "out of range" by checking the
    /// query status and page count first; the error itself is a single kind.
    #[error("insufficient results: page {page} is not available (pages: {pages})")]
    InsufficientResults {
        /// The 1-based page that was requested
        page: u32,
        /// The page count known when the request was made
        pages: u32,
    },

    /// An XML was expected for a document but could not be retrieved
    #[error("XML not found for CFDI {folio}: {reason}")]
    XmlNotFound {
        /// Folio of the document whose XML is missing
        folio: Folio,
        /// Why the XML could not be resolved
        reason: String,
    },

    /// A status transition that the lifecycle does not allow
    #[error("query {folio}: cannot move from {from} to {to}")]
    InvalidTransition {
        /// Query folio
        folio: Folio,
        /// Current status
        from: Status,
        /// Requested status
        to: Status,
    },

    /// A result/XML update that would violate the query invariants
    #[error("query {folio}: invalid update: {reason}")]
    InvalidUpdate {
        /// Query folio
        folio: Folio,
        /// What was wrong with the update
        reason: String,
    },

    /// Query parameters failed validation
    #[error("invalid parameters ({field}): {message}")]
    InvalidParameters {
        /// The offending field (e.g., "rfc")
        field: &'static str,
        /// Human-readable description
        message: String,
    },

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "pagination.page_size")
        key: Option<String>,
    },

    /// No query with this folio is known to the download service
    #[error("query not found: {0}")]
    QueryNotFound(Folio),

    /// Only queries in REPETIR can be repeated
    #[error("query {folio} cannot be repeated while {status}")]
    NotRepeatable {
        /// Query folio
        folio: Folio,
        /// Status at the time of the request
        status: Status,
    },

    /// Only settled queries can be removed
    #[error("query {folio} is still active ({status})")]
    QueryActive {
        /// Query folio
        folio: Folio,
        /// Current status
        status: Status,
    },

    /// Shutdown in progress - not accepting new queries
    #[error("shutdown in progress: not accepting new queries")]
    ShuttingDown,

    /// The portal rejected or failed a request
    #[error("portal error: {0}")]
    Portal(#[from] PortalError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::InsufficientResults { .. } => "insufficient_results",
            Error::XmlNotFound { .. } => "xml_not_found",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::InvalidUpdate { .. } => "invalid_update",
            Error::InvalidParameters { .. } => "invalid_parameters",
            Error::Config { .. } => "config_error",
            Error::QueryNotFound(_) => "query_not_found",
            Error::NotRepeatable { .. } => "not_repeatable",
            Error::QueryActive { .. } => "query_active",
            Error::ShuttingDown => "shutting_down",
            Error::Portal(e) => e.error_code(),
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
        }
    }
}

/// Failures reported by the portal transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortalError {
    /// The RFC/password pair was rejected
    #[error("authentication rejected: {0}")]
    Authentication(String),

    /// More than 500 documents share the same minute; the range must be split
    #[error("more than 500 results share the same minute")]
    SameMinuteLimit,

    /// The portal is still matching documents; poll again later
    #[error("request still pending on the portal")]
    Pending,

    /// The portal demands that the request be resubmitted
    #[error("portal requested resubmission: {0}")]
    Resubmit(String),

    /// Timeout, dropped connection, busy server
    #[error("transient portal failure: {0}")]
    Transient(String),

    /// Any other refusal
    #[error("portal rejected the request: {0}")]
    Rejected(String),
}

impl PortalError {
    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            PortalError::Authentication(_) => "portal_authentication",
            PortalError::SameMinuteLimit => "portal_same_minute_limit",
            PortalError::Pending => "portal_pending",
            PortalError::Resubmit(_) => "portal_resubmit",
            PortalError::Transient(_) => "portal_transient",
            PortalError::Rejected(_) => "portal_rejected",
        }
    }
}
