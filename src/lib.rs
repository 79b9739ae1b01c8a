/*!
 * clouddeck - S3 bucket explorer with an adaptive upload engine
 *
 * - One shared, lazily restored bucket connection
 * - Single-request or parallel multipart uploads chosen per payload
 * - Whole-transfer retry with exponential backoff
 * - Monotonic progress across concurrent parts
 * - Paginated folder listings, presigned links, rename, batch delete
 */

pub mod cli_progress;
pub mod cli_style;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;

// Re-export commonly used types
pub use config::{DeckConfig, LogLevel};
pub use error::{DeckError, Result};
pub use protocol::s3::{ConnectionManager, ConnectionParams, Explorer, S3Error, TransferRequest};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
