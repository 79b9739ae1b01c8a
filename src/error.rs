/*!
 * Error types for clouddeck
 */

use crate::protocol::s3::{ErrorClass, S3Error};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DeckError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;
pub const EXIT_ABORTED: i32 = 3;

#[derive(Debug, Error)]
pub enum DeckError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed or written
    #[error("Invalid configuration file {path}: {message}")]
    ConfigFile { path: PathBuf, message: String },

    /// Local file missing
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Logging could not be set up
    #[error("Logging error: {0}")]
    Logging(String),

    /// Object store error
    #[error(transparent)]
    Store(#[from] S3Error),
}

impl DeckError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            DeckError::Config(_)
            | DeckError::ConfigFile { .. }
            | DeckError::FileNotFound(_)
            | DeckError::Logging(_) => EXIT_FATAL,
            DeckError::Io(_) => EXIT_PARTIAL,
            DeckError::Store(err) => store_exit_code(err),
        }
    }
}

/// Process exit code for an object store failure
pub fn store_exit_code(err: &S3Error) -> i32 {
    match err.class() {
        ErrorClass::Configuration | ErrorClass::Authorization => EXIT_FATAL,
        ErrorClass::AbortedTransfer => EXIT_ABORTED,
        ErrorClass::NotFound | ErrorClass::Transient | ErrorClass::Rejected => EXIT_PARTIAL,
    }
}
