mod init;
mod macros;
mod perf;
mod trace_id;

pub use init::{init_logger, init_tracing};
pub use macros::{annotate_span, child_span, root_span};
pub use perf::warn_if_slow;
pub use trace_id::TraceId;
