//! Core types for cfdi-reporter

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a query or a CFDI document
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Folio(pub Uuid);

impl Folio {
    /// Mint a fresh random folio
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    pub fn get(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for Folio {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<Folio> for Uuid {
    fn from(folio: Folio) -> Self {
        folio.0
    }
}

impl std::fmt::Display for Folio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // SAT prints folios upper-case
        write!(f, "{:X}", self.0.hyphenated())
    }
}

impl std::str::FromStr for Folio {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s.trim())?))
    }
}

/// Lifecycle status of a query
///
/// - `EN_ESPERA`: queued, the portal request has not started
/// - `EN_PROCESO`: the portal is matching documents
/// - `DESCARGANDO`: the total is known, metadata and XMLs are being fetched
/// - `FALLO_AUTENTICACION`: the portal rejected the credentials
/// - `FALLO_500_MISMO_HORARIO`: more than 500 documents share one exact minute
/// - `FALLO`: any other failure
/// - `COMPLETADO`: every document and XML was fetched
/// - `COMPLETADO_CON_FALTANTES`: metadata is complete but some XMLs are missing
/// - `REPETIR`: the query must be discarded and repeated
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Queued and waiting to start
    EnEspera,
    /// Portal is matching documents
    EnProceso,
    /// Total known, downloading metadata and XMLs
    Descargando,
    /// Credentials rejected
    FalloAutenticacion,
    /// More than 500 results at the same minute
    #[serde(rename = "FALLO_500_MISMO_HORARIO")]
    Fallo500MismoHorario,
    /// Unclassified failure
    Fallo,
    /// All documents and XMLs fetched
    Completado,
    /// Metadata complete, one or more XMLs missing
    CompletadoConFaltantes,
    /// Discard and resubmit
    Repetir,
}

impl Status {
    /// Every status, in lifecycle order
    pub const ALL: [Status; 9] = [
        Status::EnEspera,
        Status::EnProceso,
        Status::Descargando,
        Status::FalloAutenticacion,
        Status::Fallo500MismoHorario,
        Status::Fallo,
        Status::Completado,
        Status::CompletadoConFaltantes,
        Status::Repetir,
    ];

    /// True for the three failure outcomes
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Status::FalloAutenticacion | Status::Fallo500MismoHorario | Status::Fallo
        )
    }

    /// True when the query ended with an outcome, success or failure
    pub fn is_completed(&self) -> bool {
        matches!(self, Status::Completado | Status::CompletadoConFaltantes) || self.is_failure()
    }

    /// True for the five terminal statuses. `REPETIR` is not terminal.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            Status::FalloAutenticacion
                | Status::Fallo500MismoHorario
                | Status::Fallo
                | Status::Completado
                | Status::CompletadoConFaltantes
        )
    }

    /// True when the query must be repeated
    pub fn needs_repeat(&self) -> bool {
        matches!(self, Status::Repetir)
    }

    /// Finished or marked for repetition; nothing will change any more
    pub fn is_frozen(&self) -> bool {
        self.is_finished() || self.needs_repeat()
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: Status) -> bool {
        use Status::*;

        match (self, next) {
            (from, _) if from.is_frozen() => false,
            (_, FalloAutenticacion | Fallo | Repetir) => true,
            (EnEspera, EnProceso) => true,
            (EnProceso, Descargando | Fallo500MismoHorario) => true,
            (Descargando, Completado | CompletadoConFaltantes) => true,
            _ => false,
        }
    }

    /// Wire name as reported by the portal service
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::EnEspera => "EN_ESPERA",
            Status::EnProceso => "EN_PROCESO",
            Status::Descargando => "DESCARGANDO",
            Status::FalloAutenticacion => "FALLO_AUTENTICACION",
            Status::Fallo500MismoHorario => "FALLO_500_MISMO_HORARIO",
            Status::Fallo => "FALLO",
            Status::Completado => "COMPLETADO",
            Status::CompletadoConFaltantes => "COMPLETADO_CON_FALTANTES",
            Status::Repetir => "REPETIR",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unknown status name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown query status: {0}")]
pub struct UnknownStatus(pub String);

impl std::str::FromStr for Status {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Event emitted by the download service during a query lifecycle
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Query accepted and queued
    Submitted {
        /// Query folio
        folio: Folio,
    },

    /// Query status changed
    StatusChanged {
        /// Query folio
        folio: Folio,
        /// New status
        status: Status,
    },

    /// A page of results was published
    PageReady {
        /// Query folio
        folio: Folio,
        /// 1-based page number
        page: u32,
        /// Total pages for the query
        pages: u32,
    },

    /// An expected XML could not be retrieved
    XmlMissing {
        /// Query folio
        folio: Folio,
        /// Document folio
        cfdi: Folio,
        /// Error message
        error: String,
    },

    /// A query in REPETIR was replaced by a fresh one
    Repeated {
        /// The discarded query
        original: Folio,
        /// The replacement query
        replacement: Folio,
    },

    /// The download service stopped accepting queries
    Shutdown,
}
