//! Error types and status codes for function dispatch.

use thiserror::Error;

/// HTTP-style status codes used on the function result channel.
///
/// Success, timeout and executor failures all travel through the same
/// channel (the synchronous return value or the asynchronous callback), so
/// the code is the only way a caller distinguishes them.
pub mod status {
    pub const OK: u32 = 200;
    pub const BAD_REQUEST: u32 = 400;
    pub const NOT_FOUND: u32 = 404;
    pub const TIMEOUT: u32 = 408;
    pub const INTERNAL_ERROR: u32 = 500;
    pub const NOT_READY: u32 = 503;
}

/// Errors that can occur during function registration and dispatch
#[derive(Debug, Error)]
pub enum FunctionsError {
    /// The name resolved to no descriptor in either scope
    #[error("function '{name}' is not registered")]
    NotFound { name: String },

    /// No collector is active, so no function can be serviced
    #[error("no collector is running to serve functions")]
    NotReady,

    /// The deadline elapsed before the executor resolved the call
    #[error("function call timed out")]
    Timeout,

    /// The executor itself reported a failure
    #[error("executor failed with status {status}: {message}")]
    Executor { status: u32, message: String },
}

static_assertions::const_assert!(std::mem::size_of::<FunctionsError>() <= 64);

impl FunctionsError {
    /// Map the error to its HTTP-style status code.
    pub fn status(&self) -> u32 {
        match self {
            FunctionsError::NotFound { .. } => status::NOT_FOUND,
            FunctionsError::NotReady => status::NOT_READY,
            FunctionsError::Timeout => status::TIMEOUT,
            FunctionsError::Executor { status, .. } => *status,
        }
    }
}

/// A specialized Result type for function broker operations
pub type Result<T> = std::result::Result<T, FunctionsError>;
