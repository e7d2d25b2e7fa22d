use serde::{Deserialize, Serialize};

/// Request priority. Lower values are more urgent; the derived `Ord` gives
/// the total order the Request Governor's queue sorts by directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Critical = 1,
    High = 2,
    Medium = 3,
    Low = 4,
    Background = 5,
}

impl Priority {
    pub fn meets_emergency_floor(&self) -> bool {
        *self <= Priority::High
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::Critical => "CRITICAL",
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
            Priority::Background => "BACKGROUND",
        };
        f.write_str(s)
    }
}
