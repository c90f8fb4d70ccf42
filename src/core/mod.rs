/// Core Module
///
/// The database driver and the error type shared by all of it.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{DriverError, Result};
