use std::fmt;

use anyhow::Error;

pub const SOURCE_UNAVAILABLE: &str = "SOURCE_UNAVAILABLE";
pub const SINK_UNAVAILABLE: &str = "SINK_UNAVAILABLE";
pub const DEVICE_UNAVAILABLE: &str = "DEVICE_UNAVAILABLE";
pub const MERGE_FAILED: &str = "MERGE_FAILED";

/// Typed failure carried inside an `anyhow` chain so callers can classify
/// where in the run a failure happened without string matching.
#[derive(Debug, Clone)]
pub struct CodedError {
    pub code: &'static str,
    pub message: String,
}

impl CodedError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CodedError {}

pub fn find_coded_error(error: &Error) -> Option<&CodedError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<CodedError>())
}
