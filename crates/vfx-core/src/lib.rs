//! # vfx-core
//!
//! Host-facing types shared by the VFX image readers.
//!
//! A reader never talks to a compositing graph directly. Everything it needs
//! from the host, and everything it hands back, goes through the types in
//! this crate:
//!
//! - [`Box2i`], [`Bounds`] - inclusive file windows and half-open host boxes
//! - [`Channel`], [`ChannelSet`], [`ChannelRegistry`] - semantic channel ids
//! - [`Row`] - one output scanline of per-channel `f32` arrays
//! - [`ImagePlane`] - a rectangular plane in `u8`, `u16`, `half`, `u32` or `f32`
//! - [`DeepOutputPlane`] - variable-length per-pixel sample storage
//! - [`MetaBundle`] - string keys to typed metadata values
//! - [`Host`], [`AbortFlag`] - abort, error, memory and thread hooks
//!
//! ## Crate Structure
//!
//! ```text
//! vfx-core (this crate)
//!    ^
//!    |
//!    +-- vfx-exr-reader (multi-part OpenEXR reader)
//!    +-- vfx-cli (command line front end)
//! ```
//!
//! ## Coordinate Frames
//!
//! The host frame places the origin at the lower-left corner of the display
//! window with y increasing upwards. File windows ([`Box2i`]) keep the file's
//! top-down convention. Readers translate between the two at the decode
//! boundary and nowhere else.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod channel;
pub mod deep;
pub mod error;
pub mod host;
pub mod metadata;
pub mod plane;
pub mod row;
pub mod window;

// Re-exports for convenience
pub use channel::*;
pub use deep::*;
pub use error::*;
pub use host::*;
pub use metadata::*;
pub use plane::*;
pub use row::*;
pub use window::*;

/// Prelude module for convenient imports.
///
/// # Usage
///
/// ```
/// use vfx_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::channel::{Channel, ChannelRegistry, ChannelSet, ChannelTable};
    pub use crate::deep::DeepOutputPlane;
    pub use crate::error::{Error, Result};
    pub use crate::host::{AbortFlag, Host, RecordingHost};
    pub use crate::metadata::{MetaBundle, MetaValue};
    pub use crate::plane::{DataType, ImagePlane};
    pub use crate::row::Row;
    pub use crate::window::{Bounds, Box2i};
}
