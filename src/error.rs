//! Error kinds internal to the shim.
//!
//! None of these ever cross an interceptor's C ABI boundary: callers always
//! see the real libc return value and `errno`. `ShimError` exists so internal
//! helpers can use `?` and so every failure has exactly one place it gets
//! logged (see [`crate::log::report`]).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShimError {
    /// The real libc symbol was never resolved (null in the resolver's table).
    #[error("symbol unresolved: {0}")]
    SymbolUnresolved(&'static str),
    /// FD table growth failed (segment allocation).
    #[error("fd table allocation failed")]
    AllocFailed,
    /// `getsockname`/`getpeername`/`getsockopt`/`getrusage` returned an error.
    #[error("os query failed: {0}")]
    OsQueryFailed(&'static str),
    /// `Output::send_event` reported a non-zero status.
    #[error("output emit failed")]
    EmitFailed,
    /// `Config::read` found no usable config file; defaults were used instead.
    #[error("config missing: {0}")]
    ConfigMissing(String),
}

pub type ShimResult<T> = Result<T, ShimError>;
