pub mod config;
pub mod data_type;
pub mod error;
pub mod historical;
pub mod priority;
pub mod provider;
pub mod quality;
pub mod request;
pub mod source_kind;

pub use config::{CacheStrategy, Environment, IngestConfig, LoadingStrategy, ProviderOverride};
pub use data_type::DataType;
pub use error::IngestError;
pub use historical::HistoricalRange;
pub use priority::Priority;
pub use provider::{ProviderDescriptor, ProviderId};
pub use quality::{FetchOutcome, Quality};
pub use request::{Request, RequestBuilder, RequestId};
pub use source_kind::SourceKind;
