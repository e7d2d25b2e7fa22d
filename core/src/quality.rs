use serde::{Deserialize, Serialize};

use crate::source_kind::SourceKind;

/// Freshness / accuracy / completeness tuple, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quality {
    pub freshness: f64,
    pub accuracy: f64,
    pub completeness: f64,
}

impl Quality {
    pub const fn new(freshness: f64, accuracy: f64, completeness: f64) -> Self {
        Self {
            freshness,
            accuracy,
            completeness,
        }
    }

    /// `true` iff every dimension is at or above the corresponding floor.
    pub fn meets_floor(&self, floor: Quality) -> bool {
        self.freshness >= floor.freshness
            && self.accuracy >= floor.accuracy
            && self.completeness >= floor.completeness
    }

    pub fn for_source(source: SourceKind, freshness_override: Option<f64>) -> Quality {
        let (freshness, accuracy, completeness) = match source {
            SourceKind::FreshApi => (1.0, 1.0, 1.0),
            SourceKind::Cache => (freshness_override.unwrap_or(1.0), 0.95, 1.0),
            SourceKind::AltProvider => (1.0, 0.9, 1.0),
            SourceKind::Interpolated => (1.0, 0.7, 0.9),
            SourceKind::Static => (0.3, 0.6, 0.8),
        };
        Quality::new(freshness, accuracy, completeness)
    }
}

/// The result of a successful `fetch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchOutcome {
    pub payload: Vec<u8>,
    pub quality: Quality,
    pub source_kind: SourceKind,
}
