// anvil-sdk: Foundation layer for the Anvil worker.
// This crate has ZERO dependencies on other workspace crates and provides
// the logging capability and small parsing helpers used throughout.

pub mod string_util;
pub mod trace;

// Re-export commonly used items at crate root
pub use string_util::StringUtil;
pub use trace::{CollectingTraceWriter, NullTraceWriter, TraceWriter, TracingTraceWriter};
