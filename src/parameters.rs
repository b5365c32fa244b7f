//! Query parameters: what is being asked of the portal.
//!
//! [`Parameters`] is an immutable value once handed to the download service.
//! Windows are inclusive on both ends with second precision, which is what the
//! portal's date filters accept.

use crate::error::{Error, Result};
use chrono::{Duration, NaiveDateTime, Timelike};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

// Personas morales use a 3-letter prefix, personas físicas 4 letters
#[allow(clippy::expect_used)]
static RFC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-ZÑ&]{3,4}\d{6}[A-Z0-9]{3}$").expect("RFC pattern is valid")
});

/// Whether the RFC issued or received the documents
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// CFDIs issued by the RFC (emitidas)
    Issued,
    /// CFDIs received by the RFC (recibidas)
    #[default]
    Received,
}

/// Which documents to list by their SAT status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    /// Active and cancelled
    #[default]
    All,
    /// Only active (vigente) documents
    Active,
    /// Only cancelled documents
    Cancelled,
}

/// Description of a bulk CFDI listing request
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Parameters {
    /// Taxpayer whose documents are listed (upper-case)
    pub rfc: String,
    /// First instant of the window, inclusive
    pub start: NaiveDateTime,
    /// Last instant of the window, inclusive
    pub end: NaiveDateTime,
    /// Issued or received documents
    #[serde(default)]
    pub direction: Direction,
    /// SAT status filter
    #[serde(default)]
    pub status_filter: StatusFilter,
}

impl Parameters {
    /// Received documents of any status for `rfc` between `start` and `end`
    pub fn new(rfc: impl AsRef<str>, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self {
            rfc: rfc.as_ref().trim().to_uppercase(),
            start,
            end,
            direction: Direction::default(),
            status_filter: StatusFilter::default(),
        }
    }

    /// Set the document direction
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Set the status filter
    pub fn with_status_filter(mut self, status_filter: StatusFilter) -> Self {
        self.status_filter = status_filter;
        self
    }

    /// Check the RFC format and the window ordering
    pub fn validate(&self) -> Result<()> {
        if !RFC_PATTERN.is_match(&self.rfc) {
            return Err(Error::InvalidParameters {
                field: "rfc",
                message: format!("'{}' is not a valid RFC", self.rfc),
            });
        }
        if self.start > self.end {
            return Err(Error::InvalidParameters {
                field: "start",
                message: format!("window start {} is after end {}", self.start, self.end),
            });
        }
        Ok(())
    }

    /// Split the window into two contiguous halves at a minute boundary.
    ///
    /// This is how a FALLO_500_MISMO_HORARIO query is recovered: the portal
    /// cannot page past 500 documents stamped with the same minute, so the range
    /// is narrowed and each half submitted on its own. Returns `None` when the
    /// whole window lies within one minute and cannot be narrowed further.
    pub fn split(&self) -> Option<(Parameters, Parameters)> {
        let first_minute = truncate_to_minute(self.start);
        let last_minute = truncate_to_minute(self.end);
        let minutes = (last_minute - first_minute).num_minutes();
        if minutes < 1 {
            return None;
        }

        let pivot = first_minute + Duration::minutes(minutes / 2);
        let left = Parameters {
            end: pivot + Duration::seconds(59),
            ..self.clone()
        };
        let right = Parameters {
            start: pivot + Duration::minutes(1),
            ..self.clone()
        };
        Some((left, right))
    }
}

fn truncate_to_minute(at: NaiveDateTime) -> NaiveDateTime {
    at.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}
