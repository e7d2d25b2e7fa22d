use serde::{Deserialize, Serialize};

/// Provenance tag attached to every payload a request resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    FreshApi,
    Cache,
    AltProvider,
    Interpolated,
    Static,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SourceKind::FreshApi => "FRESH_API",
            SourceKind::Cache => "CACHE",
            SourceKind::AltProvider => "ALT_PROVIDER",
            SourceKind::Interpolated => "INTERPOLATED",
            SourceKind::Static => "STATIC",
        };
        f.write_str(s)
    }
}
