use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use corelib::DataType;

/// Magic prefix marking an LZ4-compressed blob. A blob with no matching
/// prefix is read back as-is, so entries written before compression was
/// enabled for a data type still decode correctly.
const COMPRESSION_MAGIC: &[u8; 4] = b"SCC1";

/// A single cache row, mirroring the `cache_entries` table.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub blob: Vec<u8>,
    pub data_type: DataType,
    pub provider: String,
    pub symbol: String,
    pub cached_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_accessed_at: DateTime<Utc>,
    pub is_permanent: bool,
    pub access_count: u64,
    pub size_bytes: u64,
    pub content_hash: String,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        blob: Vec<u8>,
        data_type: DataType,
        provider: impl Into<String>,
        symbol: impl Into<String>,
        is_permanent: bool,
        ttl_secs: Option<i64>,
        now: DateTime<Utc>,
    ) -> Self {
        let content_hash = checksum(&blob);
        let size_bytes = blob.len() as u64;
        let expires_at = if is_permanent {
            None
        } else {
            ttl_secs.map(|s| now + chrono::Duration::seconds(s))
        };
        Self {
            key: key.into(),
            blob,
            data_type,
            provider: provider.into(),
            symbol: symbol.into(),
            cached_at: now,
            expires_at,
            last_accessed_at: now,
            is_permanent,
            access_count: 0,
            size_bytes,
            content_hash,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.is_permanent && self.expires_at.is_some_and(|e| e < now)
    }
}

/// SHA-256 hex digest over the uncompressed blob; used both for integrity
/// validation and for deduplication lookups.
pub fn checksum(blob: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(blob);
    hex::encode(hasher.finalize())
}

pub fn compress(blob: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(blob.len() + 4);
    out.extend_from_slice(COMPRESSION_MAGIC);
    out.extend_from_slice(&lz4_flex::compress_prepend_size(blob));
    out
}

/// Transparently decodes either a compressed blob (magic-prefixed) or a
/// plain legacy blob.
pub fn decompress(stored: &[u8]) -> anyhow::Result<Vec<u8>> {
    if stored.len() >= 4 && &stored[0..4] == COMPRESSION_MAGIC {
        let decompressed = lz4_flex::decompress_size_prepended(&stored[4..])?;
        Ok(decompressed)
    } else {
        Ok(stored.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compress_round_trips() {
        let original = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let compressed = compress(&original);
        assert_eq!(&compressed[0..4], COMPRESSION_MAGIC);
        let restored = decompress(&compressed).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn decompress_passes_through_uncompressed_legacy_blob() {
        let legacy = b"plain bytes with no magic header".to_vec();
        let restored = decompress(&legacy).unwrap();
        assert_eq!(restored, legacy);
    }

    #[test]
    fn checksum_is_deterministic() {
        let a = checksum(b"hello");
        let b = checksum(b"hello");
        assert_eq!(a, b);
        assert_ne!(a, checksum(b"hellp"));
    }
}
