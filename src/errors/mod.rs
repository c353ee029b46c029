//! Error handling for the download-job service.
//!
//! The web layer maps these onto HTTP statuses; the worker pool maps
//! [`ExtractError`] onto retry decisions and the client-facing failure
//! taxonomy.

pub mod types;

pub use types::*;

/// Convenience alias used at component boundaries.
pub type AppResult<T> = Result<T, AppError>;
