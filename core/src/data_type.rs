use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The category of data a request or cache entry carries. Cache policies
/// and quality floors are keyed by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Price,
    Historical,
    News,
    Sentiment,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Price => "price",
            DataType::Historical => "historical",
            DataType::News => "news",
            DataType::Sentiment => "sentiment",
        }
    }

    /// Interpolation is only meaningful for price-like series.
    pub fn supports_interpolation(&self) -> bool {
        matches!(self, DataType::Price)
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "price" => Ok(DataType::Price),
            "historical" => Ok(DataType::Historical),
            "news" => Ok(DataType::News),
            "sentiment" => Ok(DataType::Sentiment),
            other => Err(format!("unknown data_type: {other}")),
        }
    }
}
