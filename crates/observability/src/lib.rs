//! Process-wide tracing setup shared by the binaries.

/// Initialize tracing with JSON output.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::Json);
}

pub mod tracing;
