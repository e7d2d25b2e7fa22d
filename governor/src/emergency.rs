use std::sync::atomic::{AtomicBool, Ordering};

use corelib::Priority;

/// Emergency mode gate. Auto-entered when the Quota Tracker observes two or
/// more providers simultaneously exhausted; auto-exited on the next check
/// once no provider is exhausted. While active, only Critical/High priority
/// requests for a symbol on the emergency allow-list are admitted.
pub struct EmergencyMode {
    active: AtomicBool,
}

impl EmergencyMode {
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn set(&self, active: bool) {
        if self.active.swap(active, Ordering::Relaxed) != active {
            if active {
                tracing::warn!("emergency mode engaged");
            } else {
                tracing::info!("emergency mode cleared");
            }
        }
    }

    /// Admission check applied only while emergency mode is active.
    pub fn should_serve(&self, priority: Priority, critical_symbols: &[String], symbol: &str) -> bool {
        if !self.is_active() {
            return true;
        }
        priority.meets_emergency_floor() && critical_symbols.iter().any(|s| s == symbol)
    }
}

impl Default for EmergencyMode {
    fn default() -> Self {
        Self::new()
    }
}
