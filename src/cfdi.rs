//! CFDI document metadata as listed by the portal.
//!
//! [`CfdiMeta`] is the unit of result. Callers that persist results usually
//! want their own representation; [`FromCfdiMeta`] lets
//! [`Query::results_as`](crate::Query::results_as) build it directly, and
//! [`CfdiRecord`] lets any such representation be used for XML lookups.

use crate::types::Folio;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Effect of the voucher (tipo de comprobante)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    /// Ingreso
    Income,
    /// Egreso
    Expense,
    /// Traslado
    Transfer,
    /// Nómina
    Payroll,
    /// Pago
    Payment,
}

/// Status of the document at the SAT
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CfdiStatus {
    /// Vigente
    #[default]
    Active,
    /// Cancelado
    Cancelled,
}

/// Metadata of one CFDI
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CfdiMeta {
    /// Fiscal folio (UUID) of the document
    pub folio: Folio,
    /// Issuer RFC
    pub issuer_rfc: String,
    /// Issuer name as registered
    #[serde(default)]
    pub issuer_name: String,
    /// Receiver RFC
    pub receiver_rfc: String,
    /// Receiver name as registered
    #[serde(default)]
    pub receiver_name: String,
    /// When the document was issued
    pub issued_at: NaiveDateTime,
    /// When the PAC certified it
    #[serde(default)]
    pub certified_at: Option<NaiveDateTime>,
    /// RFC of the certifying PAC
    #[serde(default)]
    pub pac_rfc: Option<String>,
    /// Document total
    pub total: f64,
    /// Voucher effect
    pub effect: Effect,
    /// SAT status
    #[serde(default)]
    pub status: CfdiStatus,
    /// Cancellation instant, for cancelled documents
    #[serde(default)]
    pub cancelled_at: Option<NaiveDateTime>,
}

impl CfdiMeta {
    /// Whether the SAT reports the document as cancelled
    pub fn is_cancelled(&self) -> bool {
        self.status == CfdiStatus::Cancelled
    }
}

/// Anything that carries CFDI metadata
pub trait CfdiRecord {
    /// The underlying metadata
    fn meta(&self) -> &CfdiMeta;

    /// The document folio
    fn folio(&self) -> Folio {
        self.meta().folio
    }
}

impl CfdiRecord for CfdiMeta {
    fn meta(&self) -> &CfdiMeta {
        self
    }
}

/// Representations that can be built from base metadata
pub trait FromCfdiMeta: Sized {
    /// Build `Self` from one listed document
    fn from_cfdi_meta(meta: CfdiMeta) -> Self;
}

impl FromCfdiMeta for CfdiMeta {
    fn from_cfdi_meta(meta: CfdiMeta) -> Self {
        meta
    }
}
