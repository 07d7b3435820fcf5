//! Configuration Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A configuration source could not be read or parsed.
    #[display("could not load configuration: {_0}")]
    Load(#[error(not(source))] String),
    /// Configuration loaded, but the values don't make sense together.
    #[display("invalid configuration: {_0}")]
    Invalid(#[error(not(source))] String),
}
