//! Quota Tracker: per-provider daily/monthly counters, minimum inter-request
//! spacing, and day/month rollover. Mutated only while the Request Governor
//! holds that provider's worker lock, so internal state is protected with a
//! plain `Mutex` rather than anything lock-free.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use corelib::ProviderId;
use registry::ProviderRegistry;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MayRequest {
    Allowed,
    Wait(Duration),
    DeniedDaily,
    DeniedMonthly,
}

/// Point-in-time usage snapshot for `stats()`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuotaStats {
    pub daily_used: u32,
    pub daily_remaining: u32,
    pub monthly_used: u32,
    pub monthly_remaining: u32,
    pub utilization_pct: f64,
    pub next_daily_reset: DateTime<Utc>,
}

/// Durable snapshot written after every `record`, used to rehydrate a
/// tracker without replaying the 24h timestamp ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub provider: String,
    pub daily_used: u32,
    pub monthly_used: u32,
    pub day_reset_at: DateTime<Utc>,
    pub month_reset_at: DateTime<Utc>,
    pub last_request_at: Option<DateTime<Utc>>,
}

struct QuotaState {
    daily_cap: u32,
    monthly_cap: u32,
    min_interval: Duration,
    daily_used: u32,
    monthly_used: u32,
    day_reset_at: DateTime<Utc>,
    month_reset_at: DateTime<Utc>,
    last_request_at: Option<DateTime<Utc>>,
    /// Bounded both by a 24h age window and by a hard capacity so a
    /// provider with a very large daily cap can't grow this unboundedly.
    recent_timestamps: VecDeque<DateTime<Utc>>,
    ring_capacity: usize,
}

impl QuotaState {
    fn new(daily_cap: u32, monthly_cap: u32, min_interval: Duration, now: DateTime<Utc>) -> Self {
        Self {
            daily_cap,
            monthly_cap,
            min_interval,
            daily_used: 0,
            monthly_used: 0,
            day_reset_at: now + chrono::Duration::hours(24),
            month_reset_at: now + chrono::Duration::days(30),
            last_request_at: None,
            recent_timestamps: VecDeque::new(),
            ring_capacity: (daily_cap as usize).max(4096),
        }
    }

    fn roll_if_due(&mut self, now: DateTime<Utc>) {
        if now >= self.day_reset_at {
            self.daily_used = 0;
            self.day_reset_at += chrono::Duration::hours(24);
        }
        if now >= self.month_reset_at {
            self.monthly_used = 0;
            self.month_reset_at += chrono::Duration::days(30);
        }
    }

    fn may_request(&mut self, now: DateTime<Utc>) -> MayRequest {
        self.roll_if_due(now);
        if self.daily_used >= self.daily_cap {
            return MayRequest::DeniedDaily;
        }
        if self.monthly_used >= self.monthly_cap {
            return MayRequest::DeniedMonthly;
        }
        if let Some(last) = self.last_request_at {
            let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
            if elapsed < self.min_interval {
                return MayRequest::Wait(self.min_interval - elapsed);
            }
        }
        MayRequest::Allowed
    }

    fn record(&mut self, now: DateTime<Utc>) {
        self.roll_if_due(now);
        self.daily_used = self.daily_used.saturating_add(1);
        self.monthly_used = self.monthly_used.saturating_add(1);
        self.last_request_at = Some(now);

        self.recent_timestamps.push_back(now);
        let cutoff = now - chrono::Duration::hours(24);
        while self
            .recent_timestamps
            .front()
            .is_some_and(|t| *t < cutoff)
        {
            self.recent_timestamps.pop_front();
        }
        while self.recent_timestamps.len() > self.ring_capacity {
            self.recent_timestamps.pop_front();
        }
    }

    fn stats(&mut self, now: DateTime<Utc>) -> QuotaStats {
        self.roll_if_due(now);
        let daily_remaining = self.daily_cap.saturating_sub(self.daily_used);
        let monthly_remaining = self.monthly_cap.saturating_sub(self.monthly_used);
        let utilization_pct = if self.daily_cap == 0 {
            0.0
        } else {
            self.daily_used as f64 / self.daily_cap as f64 * 100.0
        };
        QuotaStats {
            daily_used: self.daily_used,
            daily_remaining,
            monthly_used: self.monthly_used,
            monthly_remaining,
            utilization_pct,
            next_daily_reset: self.day_reset_at,
        }
    }

    fn snapshot(&self, provider: &ProviderId) -> QuotaSnapshot {
        QuotaSnapshot {
            provider: provider.as_str().to_string(),
            daily_used: self.daily_used,
            monthly_used: self.monthly_used,
            day_reset_at: self.day_reset_at,
            month_reset_at: self.month_reset_at,
            last_request_at: self.last_request_at,
        }
    }

    fn restore(&mut self, snapshot: &QuotaSnapshot) {
        self.daily_used = snapshot.daily_used;
        self.monthly_used = snapshot.monthly_used;
        self.day_reset_at = snapshot.day_reset_at;
        self.month_reset_at = snapshot.month_reset_at;
        self.last_request_at = snapshot.last_request_at;
        // The ring only feeds diagnostics, not admission control, so it is
        // deliberately left empty rather than replayed from the snapshot.
        self.recent_timestamps.clear();
    }
}

/// Owned, explicitly-constructed tracker — never a process-wide singleton.
/// One instance is created at startup from the [`ProviderRegistry`] and
/// passed by reference (usually inside an `Arc`) to the Request Governor.
pub struct QuotaTracker {
    states: HashMap<ProviderId, Mutex<QuotaState>>,
}

impl QuotaTracker {
    pub fn from_registry(registry: &ProviderRegistry, now: DateTime<Utc>) -> Self {
        let mut states = HashMap::new();
        for descriptor in registry.all() {
            states.insert(
                descriptor.id.clone(),
                Mutex::new(QuotaState::new(
                    descriptor.daily_cap,
                    descriptor.monthly_cap,
                    descriptor.min_interval,
                    now,
                )),
            );
        }
        Self { states }
    }

    fn state(&self, provider: &ProviderId) -> &Mutex<QuotaState> {
        self.states
            .get(provider)
            .unwrap_or_else(|| panic!("provider {provider} not registered with QuotaTracker"))
    }

    pub fn may_request(&self, provider: &ProviderId, now: DateTime<Utc>) -> MayRequest {
        self.state(provider).lock().may_request(now)
    }

    pub fn record(&self, provider: &ProviderId, now: DateTime<Utc>) {
        self.state(provider).lock().record(now);
        tracing::debug!(provider = %provider, "quota recorded");
    }

    pub fn stats(&self, provider: &ProviderId, now: DateTime<Utc>) -> QuotaStats {
        self.state(provider).lock().stats(now)
    }

    pub fn all_stats(&self, now: DateTime<Utc>) -> HashMap<ProviderId, QuotaStats> {
        self.states
            .iter()
            .map(|(id, state)| (id.clone(), state.lock().stats(now)))
            .collect()
    }

    pub fn snapshot(&self, provider: &ProviderId) -> QuotaSnapshot {
        self.state(provider).lock().snapshot(provider)
    }

    pub fn snapshot_all(&self) -> Vec<QuotaSnapshot> {
        self.states
            .iter()
            .map(|(id, state)| state.lock().snapshot(id))
            .collect()
    }

    pub fn restore(&self, snapshot: &QuotaSnapshot) {
        if let Some(state) = self.states.get(&ProviderId::new(snapshot.provider.clone())) {
            state.lock().restore(snapshot);
        }
    }

    /// `true` when two or more providers are `DeniedDaily` simultaneously —
    /// the Request Governor's automatic trigger for emergency mode.
    pub fn two_or_more_exhausted(&self, now: DateTime<Utc>) -> bool {
        self.states
            .values()
            .filter(|s| matches!(s.lock().may_request(now), MayRequest::DeniedDaily))
            .count()
            >= 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn registry_with(daily: u32, monthly: u32, min_interval_ms: u64) -> ProviderRegistry {
        let mut reg = ProviderRegistry::new();
        reg.register(corelib::ProviderDescriptor {
            id: ProviderId::new("cc"),
            base_url: "https://cc.example.com".into(),
            daily_cap: daily,
            monthly_cap: monthly,
            max_requests_per_second: 10,
            min_interval: StdDuration::from_millis(min_interval_ms),
            auth_required: false,
            supported_data_types: vec!["price".into()],
        })
        .unwrap();
        reg
    }

    #[test]
    fn records_increment_daily_and_monthly() {
        let reg = registry_with(10, 100, 0);
        let now = Utc::now();
        let tracker = QuotaTracker::from_registry(&reg, now);
        let p = ProviderId::new("cc");
        for _ in 0..3 {
            tracker.record(&p, now);
        }
        let stats = tracker.stats(&p, now);
        assert_eq!(stats.daily_used, 3);
        assert_eq!(stats.monthly_used, 3);
    }

    #[test]
    fn denies_daily_at_cap() {
        let reg = registry_with(2, 100, 0);
        let now = Utc::now();
        let tracker = QuotaTracker::from_registry(&reg, now);
        let p = ProviderId::new("cc");
        tracker.record(&p, now);
        tracker.record(&p, now);
        assert_eq!(tracker.may_request(&p, now), MayRequest::DeniedDaily);
    }

    #[test]
    fn enforces_minimum_interval() {
        let reg = registry_with(100, 1000, 1000);
        let t0 = Utc::now();
        let tracker = QuotaTracker::from_registry(&reg, t0);
        let p = ProviderId::new("cc");
        tracker.record(&p, t0);
        let t1 = t0 + chrono::Duration::milliseconds(100);
        match tracker.may_request(&p, t1) {
            MayRequest::Wait(d) => assert!(d <= StdDuration::from_millis(900)),
            other => panic!("expected Wait, got {other:?}"),
        }
        let t2 = t0 + chrono::Duration::milliseconds(1000);
        assert_eq!(tracker.may_request(&p, t2), MayRequest::Allowed);
    }

    #[test]
    fn daily_rolls_over_after_24h() {
        let reg = registry_with(1, 100, 0);
        let t0 = Utc::now();
        let tracker = QuotaTracker::from_registry(&reg, t0);
        let p = ProviderId::new("cc");
        tracker.record(&p, t0);
        assert_eq!(tracker.may_request(&p, t0), MayRequest::DeniedDaily);
        let next_day = t0 + chrono::Duration::hours(25);
        assert_eq!(tracker.may_request(&p, next_day), MayRequest::Allowed);
    }

    #[test]
    fn clock_going_backwards_does_not_remove_recorded_usage() {
        let reg = registry_with(5, 100, 0);
        let now = Utc::now();
        let tracker = QuotaTracker::from_registry(&reg, now);
        let p = ProviderId::new("cc");
        tracker.record(&p, now);
        let earlier = now - chrono::Duration::seconds(5);
        // A request evaluated with an earlier clock must not see usage undone.
        let stats = tracker.stats(&p, earlier);
        assert_eq!(stats.daily_used, 1);
    }

    #[test]
    fn snapshot_restore_round_trip_without_ring() {
        let reg = registry_with(10, 100, 0);
        let now = Utc::now();
        let tracker = QuotaTracker::from_registry(&reg, now);
        let p = ProviderId::new("cc");
        tracker.record(&p, now);
        tracker.record(&p, now);
        let snap = tracker.snapshot(&p);
        assert_eq!(snap.daily_used, 2);

        let reg2 = registry_with(10, 100, 0);
        let tracker2 = QuotaTracker::from_registry(&reg2, now);
        tracker2.restore(&snap);
        let stats = tracker2.stats(&p, now);
        assert_eq!(stats.daily_used, 2);
    }

    #[test]
    fn two_or_more_exhausted_detects_emergency_trigger() {
        let mut reg = ProviderRegistry::new();
        for id in ["cc", "av"] {
            reg.register(corelib::ProviderDescriptor {
                id: ProviderId::new(id),
                base_url: format!("https://{id}.example.com"),
                daily_cap: 1,
                monthly_cap: 10,
                max_requests_per_second: 1,
                min_interval: StdDuration::ZERO,
                auth_required: false,
                supported_data_types: vec!["price".into()],
            })
            .unwrap();
        }
        let now = Utc::now();
        let tracker = QuotaTracker::from_registry(&reg, now);
        tracker.record(&ProviderId::new("cc"), now);
        assert!(!tracker.two_or_more_exhausted(now));
        tracker.record(&ProviderId::new("av"), now);
        assert!(tracker.two_or_more_exhausted(now));
    }
}
