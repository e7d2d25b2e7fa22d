use chrono::{DateTime, Utc};

/// Lifecycle state of a historical back-fill run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingState {
    Running,
    Paused,
    Completed,
    CompletedWithErrors,
    Cancelled,
}

/// Point-in-time snapshot of a back-fill run, returned by `status`.
#[derive(Debug, Clone)]
pub struct Progress {
    pub state: LoadingState,
    pub total_chunks: usize,
    pub completed: usize,
    pub failed: usize,
    pub bytes: u64,
    pub eta: Option<DateTime<Utc>>,
}

impl Progress {
    pub fn new(total_chunks: usize) -> Self {
        Self {
            state: LoadingState::Running,
            total_chunks,
            completed: 0,
            failed: 0,
            bytes: 0,
            eta: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            LoadingState::Completed | LoadingState::CompletedWithErrors | LoadingState::Cancelled
        )
    }
}
