use corelib::{Quality, SourceKind};

/// Pure scoring function: `(source_kind, age, policy_ttl)` → a
/// `(freshness, accuracy, completeness)` tuple. Only `Cache` decays with
/// age; every other source kind has a fixed score.
pub fn score(source: SourceKind, age_secs: Option<i64>, ttl_secs: Option<i64>) -> Quality {
    let freshness_override = match source {
        SourceKind::Cache => {
            let age = age_secs.unwrap_or(0).max(0) as f64;
            let ttl = ttl_secs.unwrap_or(1).max(1) as f64;
            Some((1.0 - age / ttl).max(0.0))
        }
        _ => None,
    };
    Quality::for_source(source, freshness_override)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_api_is_perfect() {
        let q = score(SourceKind::FreshApi, None, None);
        assert_eq!(q, Quality::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn cache_decays_linearly_with_age() {
        let q = score(SourceKind::Cache, Some(450), Some(900));
        assert!((q.freshness - 0.5).abs() < 1e-9);
    }

    #[test]
    fn cache_floors_at_zero_past_ttl() {
        let q = score(SourceKind::Cache, Some(10_000), Some(900));
        assert_eq!(q.freshness, 0.0);
    }

    #[test]
    fn quality_ordering_monotonic_fresh_cache_static() {
        let fresh = score(SourceKind::FreshApi, None, None);
        let cache = score(SourceKind::Cache, Some(0), Some(900));
        let static_ = score(SourceKind::Static, None, None);
        assert!(fresh.accuracy >= cache.accuracy);
        assert!(cache.accuracy >= static_.accuracy);
        assert!(fresh.freshness >= cache.freshness);
        assert!(cache.freshness >= static_.freshness);
    }
}
