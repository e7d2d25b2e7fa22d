//! Historical Range Loader: chunks a [`HistoricalRange`] and drives each
//! chunk through the Request Governor, tracking progress separately from
//! any single request and enforcing a self-imposed daily call ceiling on
//! top of whatever quota the provider itself allows.

pub mod progress;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};

use cache::CacheStore;
use corelib::historical::{Chunk, DEFAULT_CHUNK_SPAN_DAYS};
use corelib::{DataType, HistoricalRange, IngestError, LoadingStrategy, Priority, RequestBuilder};
use governor::RequestGovernor;

pub use progress::{LoadingState, Progress};

/// Identifies one `load()` call. Monotonic within a process, not persisted
/// across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadingId(pub u64);

impl std::fmt::Display for LoadingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "load-{}", self.0)
    }
}

/// A chunk still waiting to be fetched, with how many times it's already
/// been attempted.
struct PendingChunk {
    chunk: Chunk,
    attempts: u32,
}

/// A chunk is retried up to this many times (covering both transport
/// failures and low-completeness responses) before it's given up on.
const MAX_CHUNK_ATTEMPTS: u32 = 3;

/// Below this fraction of expected points, a chunk's response is treated
/// as incomplete and requeued rather than cached.
const MIN_COMPLETENESS: f64 = 0.60;

enum ChunkOutcome {
    Stored(u64),
    Incomplete,
}

struct Slot {
    range: HistoricalRange,
    remaining: Mutex<VecDeque<PendingChunk>>,
    progress: Mutex<Progress>,
    paused: AtomicBool,
    cancelled: AtomicBool,
}

struct Inner {
    governor: RequestGovernor,
    cache: Arc<CacheStore>,
    strategy: LoadingStrategy,
    emergency_critical_symbols: Vec<String>,
    slots: Mutex<HashMap<LoadingId, Arc<Slot>>>,
    next_id: AtomicU64,
    calls_today: AtomicU64,
    call_day: Mutex<DateTime<Utc>>,
}

/// Cheaply cloneable handle; every clone shares the same in-flight runs and
/// daily call counter.
#[derive(Clone)]
pub struct HistoricalLoader(Arc<Inner>);

impl HistoricalLoader {
    pub fn new(
        governor: RequestGovernor,
        cache: Arc<CacheStore>,
        strategy: LoadingStrategy,
        emergency_critical_symbols: Vec<String>,
    ) -> Self {
        Self(Arc::new(Inner {
            governor,
            cache,
            strategy,
            emergency_critical_symbols,
            slots: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            calls_today: AtomicU64::new(0),
            call_day: Mutex::new(Utc::now()),
        }))
    }

    /// Starts a back-fill run and returns immediately with its id. A
    /// loading strategy of `Emergency` accepts only symbols in the
    /// emergency allowlist, rejecting anything else before a single chunk
    /// is created.
    pub fn load(&self, range: HistoricalRange) -> Result<LoadingId, IngestError> {
        if matches!(self.0.strategy, LoadingStrategy::Emergency)
            && !self.0.emergency_critical_symbols.iter().any(|s| s == &range.symbol)
        {
            return Err(IngestError::EmergencyDenied);
        }

        let chunks = range.chunks(DEFAULT_CHUNK_SPAN_DAYS);
        if chunks.is_empty() {
            return Err(IngestError::InvalidConfig("historical range is empty".into()));
        }

        let total = chunks.len();
        let remaining = chunks
            .into_iter()
            .map(|chunk| PendingChunk { chunk, attempts: 0 })
            .collect();

        let id = LoadingId(self.0.next_id.fetch_add(1, Ordering::Relaxed));
        let slot = Arc::new(Slot {
            range,
            remaining: Mutex::new(remaining),
            progress: Mutex::new(Progress::new(total)),
            paused: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        });
        self.0.slots.lock().insert(id, slot.clone());

        let loader = self.clone();
        tokio::spawn(async move {
            loader.drain(id, slot).await;
        });

        Ok(id)
    }

    pub fn status(&self, id: LoadingId) -> Option<Progress> {
        self.0.slots.lock().get(&id).map(|s| s.progress.lock().clone())
    }

    /// Sets the paused flag; the in-flight chunk (if any) still finishes,
    /// but the drain loop exits before starting the next one. `resume`
    /// respawns it.
    pub fn pause(&self, id: LoadingId) -> bool {
        let Some(slot) = self.0.slots.lock().get(&id).cloned() else {
            return false;
        };
        slot.paused.store(true, Ordering::Relaxed);
        slot.progress.lock().state = LoadingState::Paused;
        true
    }

    pub fn resume(&self, id: LoadingId) -> bool {
        let Some(slot) = self.0.slots.lock().get(&id).cloned() else {
            return false;
        };
        if !slot.paused.swap(false, Ordering::Relaxed) {
            return true;
        }
        if slot.progress.lock().is_terminal() {
            return true;
        }
        slot.progress.lock().state = LoadingState::Running;
        let loader = self.clone();
        tokio::spawn(async move {
            loader.drain(id, slot).await;
        });
        true
    }

    pub fn cancel(&self, id: LoadingId) -> bool {
        let Some(slot) = self.0.slots.lock().get(&id).cloned() else {
            return false;
        };
        slot.cancelled.store(true, Ordering::Relaxed);
        true
    }

    fn maybe_roll_day(&self) {
        let now = Utc::now();
        let mut day = self.0.call_day.lock();
        if now.date_naive() != day.date_naive() {
            *day = now;
            self.0.calls_today.store(0, Ordering::Relaxed);
        }
    }

    /// Pulls chunks off `slot.remaining` one at a time until it's drained,
    /// cancelled, or paused (by user request or by hitting the daily call
    /// ceiling). Leaving the queue non-empty with `paused = true` is how a
    /// ceiling-triggered stop and a user-triggered pause both resume the
    /// same way.
    async fn drain(&self, id: LoadingId, slot: Arc<Slot>) {
        let (max_daily_calls, chunk_delay_ms) = self.0.strategy.tuning();
        let chunk_delay = Duration::from_millis(chunk_delay_ms);

        loop {
            if slot.cancelled.load(Ordering::Relaxed) {
                slot.progress.lock().state = LoadingState::Cancelled;
                return;
            }
            if slot.paused.load(Ordering::Relaxed) {
                return;
            }

            self.maybe_roll_day();
            if self.0.calls_today.load(Ordering::Relaxed) >= max_daily_calls as u64 {
                info!(%id, max_daily_calls, "self-imposed daily call ceiling reached, pausing load");
                slot.paused.store(true, Ordering::Relaxed);
                slot.progress.lock().state = LoadingState::Paused;
                return;
            }

            let Some(mut pending) = slot.remaining.lock().pop_front() else {
                break;
            };

            self.0.calls_today.fetch_add(1, Ordering::Relaxed);
            match self.load_chunk(&slot.range, pending.chunk).await {
                Ok(ChunkOutcome::Stored(bytes)) => {
                    let mut p = slot.progress.lock();
                    p.completed += 1;
                    p.bytes += bytes;
                }
                Ok(ChunkOutcome::Incomplete) | Err(()) => {
                    pending.attempts += 1;
                    if pending.attempts < MAX_CHUNK_ATTEMPTS {
                        slot.remaining.lock().push_back(pending);
                    } else {
                        warn!(%id, chunk_start = %pending.chunk.start, "chunk exhausted retries, skipping");
                        slot.progress.lock().failed += 1;
                    }
                }
            }

            tokio::time::sleep(chunk_delay).await;
        }

        let failed = slot.progress.lock().failed;
        if failed == 0 {
            if let Err(e) = self.persist_full_range(&slot.range).await {
                warn!(%id, error = %e, "failed to persist merged full-range historical entry");
            }
        }

        let mut p = slot.progress.lock();
        p.state = if p.failed > 0 {
            LoadingState::CompletedWithErrors
        } else {
            LoadingState::Completed
        };
    }

    /// Every chunk of a fully completed load is already a permanent cache
    /// entry keyed on its own sub-range; `has_historical`/`get_historical`
    /// called with the *full* range still need their own entry, since the
    /// cache key is exact on `(start, end)`. Re-fetches each chunk's blob
    /// (deterministically re-derived from `range`, so this doesn't need
    /// its own bookkeeping) and stores the concatenation under the
    /// full-range key.
    async fn persist_full_range(&self, range: &HistoricalRange) -> anyhow::Result<()> {
        let chunks = range.chunks(DEFAULT_CHUNK_SPAN_DAYS);
        if chunks.len() <= 1 {
            return Ok(());
        }

        let mut merged = Vec::new();
        for chunk in &chunks {
            let Some(blob) = self.0.cache.get_historical(range, chunk.start, chunk.end).await? else {
                return Ok(());
            };
            match serde_json::from_slice::<serde_json::Value>(&blob) {
                Ok(serde_json::Value::Array(mut items)) => merged.append(&mut items),
                Ok(other) => merged.push(other),
                Err(_) => return Ok(()),
            }
        }

        let blob = serde_json::to_vec(&serde_json::Value::Array(merged))?;
        self.0
            .cache
            .put_historical(range, range.start, range.end, blob)
            .await
            .map_err(anyhow::Error::from)
    }

    async fn load_chunk(&self, range: &HistoricalRange, chunk: Chunk) -> Result<ChunkOutcome, ()> {
        if self
            .0
            .cache
            .has_historical(range, chunk.start, chunk.end)
            .await
            .unwrap_or(false)
        {
            return Ok(ChunkOutcome::Stored(0));
        }

        let request = RequestBuilder::new(DataType::Historical, range.symbol.clone())
            .provider(range.provider.clone())
            .priority(Priority::Medium)
            .allow_cache(true)
            .parameter("start", chunk.start.to_rfc3339())
            .parameter("end", chunk.end.to_rfc3339())
            .parameter("timeframe", range.timeframe.clone())
            .build();

        let handle = self.0.governor.submit(request).await;
        let outcome = handle.await_outcome(None).await.map_err(|e| {
            warn!(provider = %range.provider, symbol = %range.symbol, error = %e, "historical chunk fetch failed");
        })?;

        let observed = point_count(&outcome.payload);
        let expected = expected_points(&range.timeframe, chunk.start, chunk.end);
        let completeness = if expected == 0 { 1.0 } else { observed as f64 / expected as f64 };
        if completeness < MIN_COMPLETENESS {
            return Ok(ChunkOutcome::Incomplete);
        }

        let bytes = outcome.payload.len() as u64;
        self.0
            .cache
            .put_historical(range, chunk.start, chunk.end, outcome.payload)
            .await
            .map_err(|_| ())?;
        Ok(ChunkOutcome::Stored(bytes))
    }
}

/// Counts the data points in a normalized payload. Adapters may normalize
/// an endpoint's response to either a JSON array (one entry per point) or
/// a single object (one point); the latter counts as one.
fn point_count(payload: &[u8]) -> u64 {
    match serde_json::from_slice::<serde_json::Value>(payload) {
        Ok(serde_json::Value::Array(items)) => items.len() as u64,
        Ok(_) => 1,
        Err(_) => 0,
    }
}

/// Rough expected point count for a `[start, end)` span at `timeframe`
/// granularity, used only to judge completeness.
fn expected_points(timeframe: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    let span_secs = (end - start).num_seconds().max(0) as u64;
    let bucket_secs = timeframe_secs(timeframe);
    if bucket_secs == 0 {
        return 0;
    }
    span_secs / bucket_secs
}

fn timeframe_secs(timeframe: &str) -> u64 {
    let tf = timeframe.trim();
    if tf.is_empty() {
        return 86_400;
    }
    let split_at = tf.len() - 1;
    let (num, unit) = tf.split_at(split_at);
    let n: u64 = num.parse().unwrap_or(1).max(1);
    match unit {
        "m" => n * 60,
        "h" => n * 3_600,
        "d" => n * 86_400,
        "w" => n * 604_800,
        _ => 86_400,
    }
}
