//! # vfx-exr-reader
//!
//! Multi-part OpenEXR reader feeding the host types of `vfx-core`.
//!
//! Opening a file parses every part header, reads the chunk offset tables,
//! maps file channels onto host channels and publishes the header attributes
//! as metadata. Pixels are then pulled through one of three engines:
//!
//! - [`ExrReader::engine`] - one host row at a time, any codec
//! - [`ExrReader::fetch_plane`] - a whole [`ImagePlane`](vfx_core::ImagePlane)
//!   in its own storage type, chunks decoded in parallel
//! - [`ExrReader::do_deep_engine`] - deep scanline parts into a
//!   [`DeepOutputPlane`](vfx_core::DeepOutputPlane)
//!
//! All three are re-entrant and may run concurrently on one reader.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use vfx_core::{ChannelSet, ChannelTable, ImagePlane, RecordingHost};
//! use vfx_exr_reader::{ExrReader, ReaderConfig};
//!
//! let registry = ChannelTable::new();
//! let reader = ExrReader::open("beauty.exr", ReaderConfig::from_env(), &registry, Arc::new(RecordingHost::new()));
//!
//! let channels = ChannelSet::rgba();
//! let mut plane = ImagePlane::new(reader.info().bbox, channels.clone(), reader.plane_type(&channels));
//! reader.fetch_plane(&mut plane, &channels);
//! ```
//!
//! ## Codecs
//!
//! NONE, RLE, ZIPS and ZIP are decoded in this crate. PIZ, PXR24, B44, B44A,
//! DWAA, DWAB and tiled parts are decoded by the `exr` crate.
//!
//! ## Coordinates
//!
//! File windows are top-down; host rows count up from the bottom of the
//! display window. Host row `y` reads file line `display.max_y - y`, and
//! host x is file x shifted by [`Layout::data_offset`].

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod attribute;
pub mod catalogue;
pub mod chunk;
pub mod codec;
pub mod colour;
pub mod config;
pub mod deep;
pub mod error;
pub mod header;
pub mod memory;
pub mod metadata;
pub mod naming;
pub mod planar;
pub mod reader;
pub mod resolver;
pub mod scanline;
pub mod stream;

pub use attribute::{Compression, LineOrder, PixelType};
pub use catalogue::{Catalogue, Layout, PartSummary};
pub use colour::{ColourCurve, Linear, Srgb};
pub use config::{EdgeMode, EnvOverrides, FileReadMode, ReaderConfig};
pub use deep::DeepSetup;
pub use error::{ReadError, ReadResult};
pub use header::{PartHeader, PartType};
pub use reader::{ExrReader, ReaderInfo};
pub use resolver::{ChannelMap, ChannelSource};
pub use stream::StreamKind;
