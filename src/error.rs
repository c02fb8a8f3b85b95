//! Failure taxonomy for remote calls.
//!
//! Each component boundary maps these into concrete result values: a
//! [`CatalogueError`] ends the harvest of that endpoint only, while a
//! [`MapServiceError`] degrades to a per-row flag
//! (`capabilities_fetch_error`, `getmap_error`). Nothing here ever aborts
//! a whole run.

use thiserror::Error;

/// A catalogue endpoint could not be harvested.
#[derive(Debug, Error)]
pub enum CatalogueError {
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("endpoint returned HTTP {0}")]
    HttpStatus(u16),

    #[error("response could not be parsed: {0}")]
    Unparsable(String),
}

/// A single call to a map service failed.
#[derive(Debug, Error)]
pub enum MapServiceError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("service returned HTTP {0}")]
    HttpStatus(u16),

    #[error("capabilities document could not be parsed: {0}")]
    Unparsable(String),

    #[error("not a usable service URL: {0}")]
    BadUrl(String),
}
