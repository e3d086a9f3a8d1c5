//! Error taxonomy for the VT client.
//!
//! Validation errors block only the connect action, config load errors are
//! recovered by falling back to defaults, transport errors force a
//! disconnect. None of them terminate the process.

use thiserror::Error;

/// A settings field that failed its precondition check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Host missing or invalid")]
    Host,
    #[error("Port missing or invalid")]
    Port,
}

/// Failure to fetch the stored session settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigLoadError {
    /// The config service answered with a non-success status.
    #[error("Config load status={status}, text={text}")]
    Status { status: u16, text: String },
    /// Anything else (connect refused, malformed body, missing file).
    /// `detail` goes to the log, not to the banner.
    #[error("Unknown config load error. Check log")]
    Unknown { detail: String },
}

/// Errors returned to callers of the session and dispatcher surfaces.
#[derive(Debug, Error)]
pub enum VtError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("Event context missing or unknown data.type")]
    UnknownMessage,
}
