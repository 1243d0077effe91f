//! Error types for host-side containers.
//!
//! Readers have their own richer taxonomy; this module only covers misuse of
//! the containers in this crate (out-of-range access, exhausted registries).
//!
//! # Usage
//!
//! ```rust
//! use vfx_core::{Error, Result};
//!
//! fn check_row(y: i32, top: i32) -> Result<()> {
//!     if y >= top {
//!         return Err(Error::OutOfBounds { x: 0, y, context: "row".into() });
//!     }
//!     Ok(())
//! }
//! assert!(check_row(5, 4).is_err());
//! ```

use thiserror::Error;

/// Result type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the host containers.
#[derive(Debug, Error)]
pub enum Error {
    /// Pixel coordinates are outside the container's bounds.
    #[error("pixel ({x}, {y}) out of bounds for {context}")]
    OutOfBounds {
        /// X coordinate that was out of bounds
        x: i32,
        /// Y coordinate that was out of bounds
        y: i32,
        /// Which container rejected the access
        context: String,
    },

    /// Channel is not part of the container's channel set.
    #[error("channel {0} is not present")]
    MissingChannel(String),

    /// Channel registry cannot hold any more channels.
    #[error("channel registry exhausted ({capacity} channels)")]
    RegistryFull {
        /// Registry capacity
        capacity: usize,
    },

    /// Deep plane was filled out of order or inconsistently.
    #[error("deep plane error: {0}")]
    Deep(String),
}
