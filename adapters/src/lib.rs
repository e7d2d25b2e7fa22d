//! Provider adapters: the pluggable boundary between the ingestion core
//! and concrete data providers. A `MockAdapter` backs every other crate's
//! tests; `HttpAdapter` shows the shape a real provider integration takes.

pub mod http;
pub mod mock;
pub mod types;

pub use http::HttpAdapter;
pub use mock::MockAdapter;
pub use types::{AdapterResponse, Normalized, ProviderAdapter};
