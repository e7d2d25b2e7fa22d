use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use corelib::{CacheStrategy, DataType, HistoricalRange, IngestError};

use crate::entry::{CacheEntry, checksum, compress, decompress};
use crate::policy::PolicyEngine;

/// Global counters backing `stats().cache`. Not persisted transactionally —
/// a restart resets them, which is acceptable for a reporting-only metric.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub total_entries: u64,
    pub permanent_entries: u64,
    pub total_size_bytes: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub hit_rate: f64,
}

pub struct CacheStore {
    pool: SqlitePool,
    policy_engine: PolicyEngine,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStore {
    pub async fn connect(db_url: &str, strategy: CacheStrategy) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        let store = Self {
            pool,
            policy_engine: PolicyEngine::for_strategy(strategy),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        };
        store.init_tables().await?;
        Ok(store)
    }

    /// In-memory store for tests; every other crate's test suite builds a
    /// `CacheStore` this way rather than touching the filesystem.
    pub async fn connect_in_memory(strategy: CacheStrategy) -> anyhow::Result<Self> {
        Self::connect("sqlite::memory:", strategy).await
    }

    async fn init_tables(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                blob BLOB NOT NULL,
                data_type TEXT NOT NULL,
                provider TEXT NOT NULL,
                symbol TEXT NOT NULL,
                cached_at TEXT NOT NULL,
                expires_at TEXT,
                last_accessed_at TEXT NOT NULL,
                is_permanent INTEGER NOT NULL,
                access_count INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL,
                content_hash TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for stmt in [
            "CREATE INDEX IF NOT EXISTS idx_cache_data_type ON cache_entries(data_type)",
            "CREATE INDEX IF NOT EXISTS idx_cache_provider ON cache_entries(provider)",
            "CREATE INDEX IF NOT EXISTS idx_cache_symbol ON cache_entries(symbol)",
            "CREATE INDEX IF NOT EXISTS idx_cache_expires ON cache_entries(expires_at)",
            "CREATE INDEX IF NOT EXISTS idx_cache_hash ON cache_entries(content_hash)",
            "CREATE INDEX IF NOT EXISTS idx_cache_last_accessed ON cache_entries(last_accessed_at)",
        ] {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn policy_engine(&self) -> &PolicyEngine {
        &self.policy_engine
    }

    /// Stores `entry`, enforcing the policy for its data type first.
    /// Compresses the blob transparently when the policy requests it.
    pub async fn put(&self, mut entry: CacheEntry) -> Result<(), IngestError> {
        let policy = self.policy_engine.policy_for(entry.data_type);

        if entry.is_permanent && !policy.allow_permanent {
            return Err(IngestError::PolicyViolation(format!(
                "data_type {} does not allow permanent entries",
                entry.data_type
            )));
        }
        if entry.size_bytes > policy.max_entry_size_bytes {
            return Err(IngestError::PolicyViolation(format!(
                "entry of {} bytes exceeds max_entry_size {} for {}",
                entry.size_bytes, policy.max_entry_size_bytes, entry.data_type
            )));
        }

        let stored_blob = if policy.compress && entry.size_bytes > 100 * 1024 {
            compress(&entry.blob)
        } else {
            entry.blob.clone()
        };

        sqlx::query(
            r#"
            INSERT INTO cache_entries
                (key, blob, data_type, provider, symbol, cached_at, expires_at,
                 last_accessed_at, is_permanent, access_count, size_bytes, content_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                blob = excluded.blob,
                data_type = excluded.data_type,
                provider = excluded.provider,
                symbol = excluded.symbol,
                cached_at = excluded.cached_at,
                expires_at = excluded.expires_at,
                last_accessed_at = excluded.last_accessed_at,
                is_permanent = excluded.is_permanent,
                access_count = excluded.access_count,
                size_bytes = excluded.size_bytes,
                content_hash = excluded.content_hash
            "#,
        )
        .bind(&entry.key)
        .bind(&stored_blob)
        .bind(entry.data_type.as_str())
        .bind(&entry.provider)
        .bind(&entry.symbol)
        .bind(entry.cached_at.to_rfc3339())
        .bind(entry.expires_at.map(|e| e.to_rfc3339()))
        .bind(entry.last_accessed_at.to_rfc3339())
        .bind(entry.is_permanent as i64)
        .bind(entry.access_count as i64)
        .bind(entry.size_bytes as i64)
        .bind(&entry.content_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| IngestError::PolicyViolation(format!("cache write failed: {e}")))?;

        entry.blob = stored_blob;
        Ok(())
    }

    /// Returns the entry if present and unexpired. Expired non-permanent
    /// rows are deleted lazily in the background rather than inline, so a
    /// miss never pays for the delete's latency.
    pub async fn get(&self, key: &str) -> anyhow::Result<Option<CacheEntry>> {
        let row = sqlx::query("SELECT * FROM cache_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        let entry = row_to_entry(&row)?;
        let now = Utc::now();
        if entry.is_expired(now) {
            self.misses.fetch_add(1, Ordering::Relaxed);
            let pool = self.pool.clone();
            let key = key.to_string();
            tokio::spawn(async move {
                let _ = sqlx::query("DELETE FROM cache_entries WHERE key = ?")
                    .bind(&key)
                    .execute(&pool)
                    .await;
            });
            return Ok(None);
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        Ok(Some(entry))
    }

    pub async fn update_access(&self, key: &str) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE cache_entries SET access_count = access_count + 1, last_accessed_at = ? WHERE key = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Returns the entry regardless of expiry. Used only by the static
    /// fallback step, which deliberately serves a stale last-known value.
    pub async fn get_any(&self, key: &str) -> anyhow::Result<Option<CacheEntry>> {
        let row = sqlx::query("SELECT * FROM cache_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_entry).transpose()
    }

    /// Most recent unexpired entries for `(data_type, provider, symbol)`
    /// within the last `within_hours`, newest first. Used by the
    /// interpolation step to find neighbors to average.
    pub async fn find_recent_for_symbol(
        &self,
        data_type: DataType,
        provider: &str,
        symbol: &str,
        within_hours: i64,
        limit: i64,
    ) -> anyhow::Result<Vec<CacheEntry>> {
        let cutoff = (Utc::now() - chrono::Duration::hours(within_hours)).to_rfc3339();
        let rows = sqlx::query(
            r#"
            SELECT * FROM cache_entries
            WHERE data_type = ? AND provider = ? AND symbol = ? AND cached_at >= ?
            ORDER BY cached_at DESC
            LIMIT ?
            "#,
        )
        .bind(data_type.as_str())
        .bind(provider)
        .bind(symbol)
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    pub async fn find_by_hash(&self, content_hash: &str) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query("SELECT key FROM cache_entries WHERE content_hash = ?")
            .bind(content_hash)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get::<String, _>("key")).collect())
    }

    pub async fn cleanup_expired(&self) -> anyhow::Result<u64> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "DELETE FROM cache_entries WHERE is_permanent = 0 AND expires_at IS NOT NULL AND expires_at < ?",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Deletes the oldest-by-access non-permanent entries of `data_type`
    /// until its count is at or below `target_count`. Never touches
    /// permanent entries.
    pub async fn evict_lru(&self, data_type: DataType, target_count: u64) -> anyhow::Result<u64> {
        let current: i64 = sqlx::query(
            "SELECT COUNT(*) AS c FROM cache_entries WHERE data_type = ? AND is_permanent = 0",
        )
        .bind(data_type.as_str())
        .fetch_one(&self.pool)
        .await?
        .get("c");

        let current = current.max(0) as u64;
        if current <= target_count {
            return Ok(0);
        }
        let overflow = current - target_count;

        let result = sqlx::query(
            r#"
            DELETE FROM cache_entries WHERE key IN (
                SELECT key FROM cache_entries
                WHERE data_type = ? AND is_permanent = 0
                ORDER BY last_accessed_at ASC
                LIMIT ?
            )
            "#,
        )
        .bind(data_type.as_str())
        .bind(overflow as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn put_historical(
        &self,
        range: &HistoricalRange,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        blob: Vec<u8>,
    ) -> Result<(), IngestError> {
        let key = range.cache_key(start, end);
        let entry = CacheEntry::new(
            key,
            blob,
            DataType::Historical,
            range.provider.as_str(),
            range.symbol.clone(),
            true,
            None,
            Utc::now(),
        );
        self.put(entry).await
    }

    pub async fn get_historical(
        &self,
        range: &HistoricalRange,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Option<Vec<u8>>> {
        let key = range.cache_key(start, end);
        Ok(self.get(&key).await?.map(|e| e.blob))
    }

    pub async fn has_historical(
        &self,
        range: &HistoricalRange,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        Ok(self.get_historical(range, start, end).await?.is_some())
    }

    pub async fn stats(&self) -> anyhow::Result<CacheStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                SUM(CASE WHEN is_permanent = 1 THEN 1 ELSE 0 END) AS permanent,
                COALESCE(SUM(size_bytes), 0) AS total_size
            FROM cache_entries
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let total_entries: i64 = row.get("total");
        let permanent_entries: i64 = row.get::<Option<i64>, _>("permanent").unwrap_or(0);
        let total_size_bytes: i64 = row.get("total_size");

        let hit_count = self.hits.load(Ordering::Relaxed);
        let miss_count = self.misses.load(Ordering::Relaxed);
        let total_requests = hit_count + miss_count;
        let hit_rate = if total_requests == 0 {
            0.0
        } else {
            hit_count as f64 / total_requests as f64
        };

        Ok(CacheStats {
            total_entries: total_entries.max(0) as u64,
            permanent_entries: permanent_entries.max(0) as u64,
            total_size_bytes: total_size_bytes.max(0) as u64,
            hit_count,
            miss_count,
            hit_rate,
        })
    }
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<CacheEntry> {
    let data_type: String = row.get("data_type");
    let data_type = data_type
        .parse::<DataType>()
        .map_err(|e| anyhow::anyhow!(e))?;
    let stored_blob: Vec<u8> = row.get("blob");
    let blob = decompress(&stored_blob)?;
    let cached_at: String = row.get("cached_at");
    let last_accessed_at: String = row.get("last_accessed_at");
    let expires_at: Option<String> = row.get("expires_at");

    Ok(CacheEntry {
        key: row.get("key"),
        blob,
        data_type,
        provider: row.get("provider"),
        symbol: row.get("symbol"),
        cached_at: DateTime::parse_from_rfc3339(&cached_at)?.with_timezone(&Utc),
        expires_at: expires_at
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
            .transpose()?,
        last_accessed_at: DateTime::parse_from_rfc3339(&last_accessed_at)?.with_timezone(&Utc),
        is_permanent: row.get::<i64, _>("is_permanent") != 0,
        access_count: row.get::<i64, _>("access_count") as u64,
        size_bytes: row.get::<i64, _>("size_bytes") as u64,
        content_hash: row.get("content_hash"),
    })
}

/// Checks a row's stored checksum against a freshly computed one; used by
/// the maintenance pass to catch silent corruption.
pub fn validate_checksum(entry: &CacheEntry) -> bool {
    checksum(&entry.blob) == entry.content_hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips_blob() {
        let store = CacheStore::connect_in_memory(CacheStrategy::Balanced).await.unwrap();
        let entry = CacheEntry::new(
            "price:cc:BTC",
            br#"{"p":50000}"#.to_vec(),
            DataType::Price,
            "cc",
            "BTC",
            false,
            Some(900),
            Utc::now(),
        );
        store.put(entry).await.unwrap();
        let fetched = store.get("price:cc:BTC").await.unwrap().unwrap();
        assert_eq!(fetched.blob, br#"{"p":50000}"#);
    }

    #[tokio::test]
    async fn expired_non_permanent_entry_is_a_miss() {
        let store = CacheStore::connect_in_memory(CacheStrategy::Balanced).await.unwrap();
        let past = Utc::now() - chrono::Duration::hours(1);
        let entry = CacheEntry::new(
            "price:cc:BTC",
            b"stale".to_vec(),
            DataType::Price,
            "cc",
            "BTC",
            false,
            Some(1),
            past,
        );
        store.put(entry).await.unwrap();
        assert!(store.get("price:cc:BTC").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn permanent_entry_never_expires() {
        let store = CacheStore::connect_in_memory(CacheStrategy::Balanced).await.unwrap();
        let past = Utc::now() - chrono::Duration::days(400);
        let entry = CacheEntry::new(
            "hist:cc:BTC:1d:0:1",
            b"ohlcv".to_vec(),
            DataType::Historical,
            "cc",
            "BTC",
            true,
            None,
            past,
        );
        store.put(entry).await.unwrap();
        assert!(store.get("hist:cc:BTC:1d:0:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rejects_entry_larger_than_policy_max() {
        let store = CacheStore::connect_in_memory(CacheStrategy::Balanced).await.unwrap();
        let oversized = vec![0u8; 2 * 1024 * 1024];
        let entry = CacheEntry::new(
            "price:cc:BTC",
            oversized,
            DataType::Price,
            "cc",
            "BTC",
            false,
            Some(900),
            Utc::now(),
        );
        let err = store.put(entry).await.unwrap_err();
        assert_eq!(err.kind(), "POLICY_VIOLATION");
    }

    #[tokio::test]
    async fn evict_lru_never_touches_permanent_entries() {
        let store = CacheStore::connect_in_memory(CacheStrategy::Balanced).await.unwrap();
        for i in 0..3 {
            let entry = CacheEntry::new(
                format!("hist:cc:BTC:1d:{i}"),
                b"x".to_vec(),
                DataType::Historical,
                "cc",
                "BTC",
                true,
                None,
                Utc::now(),
            );
            store.put(entry).await.unwrap();
        }
        let evicted = store.evict_lru(DataType::Historical, 0).await.unwrap();
        assert_eq!(evicted, 0);
    }

    #[tokio::test]
    async fn compressed_blob_round_trips_through_large_entry() {
        let store = CacheStore::connect_in_memory(CacheStrategy::Balanced).await.unwrap();
        let big = b"ohlcv-row,".repeat(20_000);
        let entry = CacheEntry::new(
            "hist:cc:BTC:1d:big",
            big.clone(),
            DataType::Historical,
            "cc",
            "BTC",
            true,
            None,
            Utc::now(),
        );
        store.put(entry).await.unwrap();
        let fetched = store.get("hist:cc:BTC:1d:big").await.unwrap().unwrap();
        assert_eq!(fetched.blob, big);
    }

    #[tokio::test]
    async fn find_by_hash_locates_duplicate_keys() {
        let store = CacheStore::connect_in_memory(CacheStrategy::Balanced).await.unwrap();
        let blob = b"identical payload".to_vec();
        let hash = checksum(&blob);
        for key in ["news:a", "news:b"] {
            let entry = CacheEntry::new(
                key,
                blob.clone(),
                DataType::News,
                "cc",
                "BTC",
                false,
                Some(3600),
                Utc::now(),
            );
            store.put(entry).await.unwrap();
        }
        let mut keys = store.find_by_hash(&hash).await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["news:a".to_string(), "news:b".to_string()]);
    }

    #[tokio::test]
    async fn get_any_returns_expired_entry_for_static_fallback() {
        let store = CacheStore::connect_in_memory(CacheStrategy::Balanced).await.unwrap();
        let past = Utc::now() - chrono::Duration::hours(2);
        let entry = CacheEntry::new(
            "price:cc:BTC",
            b"stale-but-known".to_vec(),
            DataType::Price,
            "cc",
            "BTC",
            false,
            Some(1),
            past,
        );
        store.put(entry).await.unwrap();
        assert!(store.get("price:cc:BTC").await.unwrap().is_none());
        let stale = store.get_any("price:cc:BTC").await.unwrap().unwrap();
        assert_eq!(stale.blob, b"stale-but-known");
    }

    #[tokio::test]
    async fn find_recent_for_symbol_orders_newest_first() {
        let store = CacheStore::connect_in_memory(CacheStrategy::Balanced).await.unwrap();
        let now = Utc::now();
        for (i, ago_mins) in [(0, 10), (1, 5)] {
            let entry = CacheEntry::new(
                format!("price:cc:BTC:{i}"),
                format!("{{\"price\":{i}}}").into_bytes(),
                DataType::Price,
                "cc",
                "BTC",
                false,
                Some(3600),
                now - chrono::Duration::minutes(ago_mins),
            );
            store.put(entry).await.unwrap();
        }
        let neighbors = store
            .find_recent_for_symbol(DataType::Price, "cc", "BTC", 24, 10)
            .await
            .unwrap();
        assert_eq!(neighbors.len(), 2);
        assert!(neighbors[0].cached_at >= neighbors[1].cached_at);
    }
}
