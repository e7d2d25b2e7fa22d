use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::ProviderId;

/// Default chunk span for a back-fill: 30 days, matching a typical
/// provider's single-call history window.
pub const DEFAULT_CHUNK_SPAN_DAYS: i64 = 30;

/// One contiguous sub-range of a [`HistoricalRange`], sized to fit a single
/// provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A historical back-fill request: symbol/provider/timeframe over a date
/// span, split deterministically into chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalRange {
    pub symbol: String,
    pub provider: ProviderId,
    pub timeframe: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl HistoricalRange {
    /// Splits `[start, end)` into consecutive chunks no longer than
    /// `chunk_span_days`. The last chunk is clipped to `end`.
    pub fn chunks(&self, chunk_span_days: i64) -> Vec<Chunk> {
        assert!(chunk_span_days > 0, "chunk_span_days must be positive");
        let span = ChronoDuration::days(chunk_span_days);
        let mut chunks = Vec::new();
        let mut cursor = self.start;
        while cursor < self.end {
            let next = (cursor + span).min(self.end);
            chunks.push(Chunk {
                start: cursor,
                end: next,
            });
            cursor = next;
        }
        chunks
    }

    /// Canonical key used by the cache store for the whole range or a
    /// sub-chunk of it.
    pub fn cache_key(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
        format!(
            "hist:{}:{}:{}:{}:{}",
            self.provider,
            self.symbol,
            self.timeframe,
            start.timestamp(),
            end.timestamp()
        )
    }
}
