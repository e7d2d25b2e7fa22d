use thiserror::Error;

/// Stable error taxonomy surfaced to callers across every crate. Repository
/// and adapter I/O seams return `anyhow::Result` and are converted into one
/// of these variants at the Request Governor boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IngestError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("quota exhausted for provider {0}")]
    QuotaExhausted(String),

    #[error("provider failure ({status}): {message}")]
    ProviderFailure { status: u16, message: String },

    #[error("request timed out")]
    Timeout,

    #[error("request cancelled")]
    Cancelled,

    #[error("request denied by emergency mode")]
    EmergencyDenied,

    #[error("data quality below floor: {0}")]
    DataQualityBelowFloor(String),
}

impl IngestError {
    /// Stable machine-readable tag, independent of the human message, for
    /// logging and for callers that branch on error kind without a `match`.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::InvalidConfig(_) => "INVALID_CONFIG",
            IngestError::PolicyViolation(_) => "POLICY_VIOLATION",
            IngestError::QuotaExhausted(_) => "QUOTA_EXHAUSTED",
            IngestError::ProviderFailure { .. } => "PROVIDER_FAILURE",
            IngestError::Timeout => "TIMEOUT",
            IngestError::Cancelled => "CANCELLED",
            IngestError::EmergencyDenied => "EMERGENCY_DENIED",
            IngestError::DataQualityBelowFloor(_) => "DATA_QUALITY_BELOW_FLOOR",
        }
    }

    /// Transient failures are worth retrying with backoff before the
    /// Request Governor advances the degradation plan to the next step.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::ProviderFailure { .. })
    }
}
