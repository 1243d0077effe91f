//! One part's header: the attribute bag plus the reserved attributes pulled
//! out into typed fields.

use std::io::Read;

use vfx_core::Box2i;

use crate::attribute::{
    read_attribute, Attribute, AttributeValue, ChannelDesc, ChannelList, Compression, LineOrder, PixelType,
    TileDesc,
};
use crate::error::{ReadError, ReadResult};

/// Storage layout of a part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartType {
    /// Flat scanlines.
    Scanline,
    /// Flat tiles.
    Tiled,
    /// Deep scanlines.
    DeepScanline,
    /// Deep tiles.
    DeepTiled,
}

impl PartType {
    fn from_name(name: &str) -> ReadResult<Self> {
        match name {
            "scanlineimage" => Ok(PartType::Scanline),
            "tiledimage" => Ok(PartType::Tiled),
            "deepscanline" => Ok(PartType::DeepScanline),
            "deeptile" => Ok(PartType::DeepTiled),
            other => Err(ReadError::UnsupportedFormat(format!("part type {other:?}"))),
        }
    }

    /// Name used in the `type` attribute.
    pub const fn name(self) -> &'static str {
        match self {
            PartType::Scanline => "scanlineimage",
            PartType::Tiled => "tiledimage",
            PartType::DeepScanline => "deepscanline",
            PartType::DeepTiled => "deeptile",
        }
    }

    /// Deep parts carry per-pixel sample counts.
    pub const fn is_deep(self) -> bool {
        matches!(self, PartType::DeepScanline | PartType::DeepTiled)
    }

    /// Tiled parts.
    pub const fn is_tiled(self) -> bool {
        matches!(self, PartType::Tiled | PartType::DeepTiled)
    }
}

/// Version word flags.
pub mod flags {
    /// Single-part tiled file.
    pub const TILED: u32 = 0x200;
    /// Names up to 255 bytes.
    pub const LONG_NAMES: u32 = 0x400;
    /// Single-part deep file.
    pub const DEEP: u32 = 0x800;
    /// Multi-part file.
    pub const MULTIPART: u32 = 0x1000;
}

/// Header of one part.
#[derive(Debug, Clone)]
pub struct PartHeader {
    /// Every attribute in file order, reserved ones included.
    pub attributes: Vec<Attribute>,
    /// Storage layout.
    pub part_type: PartType,
    /// `name` attribute.
    pub name: Option<String>,
    /// `view` attribute.
    pub view: Option<String>,
    /// Channel list.
    pub channels: ChannelList,
    /// Compression.
    pub compression: Compression,
    /// Line order.
    pub line_order: LineOrder,
    /// Data window (inclusive, file frame).
    pub data_window: Box2i,
    /// Display window (inclusive, file frame).
    pub display_window: Box2i,
    /// Pixel aspect ratio.
    pub pixel_aspect: f32,
    /// Tile description for tiled parts.
    pub tiles: Option<TileDesc>,
    /// `chunkCount` attribute.
    pub chunk_count: Option<i32>,
}

impl PartHeader {
    /// Reads one attribute list. Returns `None` for the empty header that
    /// terminates a multi-part directory.
    pub fn read(reader: &mut impl Read, version_flags: u32) -> ReadResult<Option<Self>> {
        let long_names = version_flags & flags::LONG_NAMES != 0;
        let mut attributes = Vec::new();
        while let Some(attribute) = read_attribute(reader, long_names)? {
            attributes.push(attribute);
        }
        if attributes.is_empty() {
            return Ok(None);
        }
        Self::from_attributes(attributes, version_flags).map(Some)
    }

    /// Builds a header from its attributes and validates the reserved ones.
    pub fn from_attributes(attributes: Vec<Attribute>, version_flags: u32) -> ReadResult<Self> {
        let find = |name: &str| attributes.iter().find(|a| a.name == name).map(|a| &a.value);
        let missing = |name: &str| ReadError::Malformed(format!("missing required attribute {name}"));
        let wrong = |name: &str| ReadError::Malformed(format!("attribute {name} has the wrong type"));

        let channels = match find("channels").ok_or_else(|| missing("channels"))? {
            AttributeValue::Channels(list) => list.clone(),
            _ => return Err(wrong("channels")),
        };
        let compression = match find("compression").ok_or_else(|| missing("compression"))? {
            AttributeValue::Compression(c) => *c,
            _ => return Err(wrong("compression")),
        };
        let data_window = match find("dataWindow").ok_or_else(|| missing("dataWindow"))? {
            AttributeValue::Box2i(b) => *b,
            _ => return Err(wrong("dataWindow")),
        };
        let display_window = match find("displayWindow").ok_or_else(|| missing("displayWindow"))? {
            AttributeValue::Box2i(b) => *b,
            _ => return Err(wrong("displayWindow")),
        };
        let line_order = match find("lineOrder") {
            Some(AttributeValue::LineOrder(order)) => *order,
            Some(_) => return Err(wrong("lineOrder")),
            None => LineOrder::IncreasingY,
        };
        let pixel_aspect = match find("pixelAspectRatio") {
            Some(AttributeValue::Float(aspect)) => *aspect,
            Some(_) => return Err(wrong("pixelAspectRatio")),
            None => 1.0,
        };
        let tiles = match find("tiles") {
            Some(AttributeValue::Tiles(t)) => Some(*t),
            Some(_) => return Err(wrong("tiles")),
            None => None,
        };
        let chunk_count = match find("chunkCount") {
            Some(AttributeValue::Int(n)) => Some(*n),
            _ => None,
        };
        let name = find("name").and_then(AttributeValue::as_text).map(str::to_string);
        let view = find("view").and_then(AttributeValue::as_text).map(str::to_string);

        let part_type = match find("type").and_then(AttributeValue::as_text) {
            Some(kind) => PartType::from_name(kind)?,
            None if version_flags & flags::DEEP != 0 => {
                if tiles.is_some() {
                    PartType::DeepTiled
                } else {
                    PartType::DeepScanline
                }
            }
            None if version_flags & flags::TILED != 0 => PartType::Tiled,
            None => PartType::Scanline,
        };

        if data_window.is_inverted() {
            return Err(ReadError::Malformed(format!("inverted data window {data_window:?}")));
        }
        if display_window.is_inverted() {
            return Err(ReadError::Malformed(format!("inverted display window {display_window:?}")));
        }
        if part_type.is_tiled() && tiles.is_none() {
            return Err(missing("tiles"));
        }
        for (i, channel) in channels.iter().enumerate() {
            if channels[..i].iter().any(|c| c.name == channel.name) {
                return Err(ReadError::Malformed(format!("duplicate channel {}", channel.name)));
            }
        }

        Ok(Self {
            attributes,
            part_type,
            name,
            view,
            channels,
            compression,
            line_order,
            data_window,
            display_window,
            pixel_aspect,
            tiles,
            chunk_count,
        })
    }

    /// Looks up an attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.iter().find(|a| a.name == name).map(|a| &a.value)
    }

    /// Scanlines per chunk.
    pub fn lines_per_block(&self) -> usize {
        self.compression.lines_per_block()
    }

    /// Channel by file-native name.
    pub fn channel(&self, name: &str) -> Option<&ChannelDesc> {
        self.channels.iter().find(|c| c.name == name)
    }

    /// Number of chunks in the offset table.
    pub fn expected_chunk_count(&self) -> usize {
        if let Some(n) = self.chunk_count.filter(|&n| n >= 0) {
            return n as usize;
        }
        let (w, h) = (self.data_window.width(), self.data_window.height());
        match self.tiles {
            Some(tiles) if self.part_type.is_tiled() => tiles.chunk_count(w, h),
            _ => {
                let lines = self.lines_per_block() as i64;
                ((h + lines - 1) / lines) as usize
            }
        }
    }

    /// Bytes of one uncompressed file line covering the whole data window.
    ///
    /// Sub-sampled channels only contribute on lines they are sampled on.
    pub fn line_bytes(&self, y: i32) -> usize {
        let width = self.data_window.width();
        self.channels
            .iter()
            .filter(|c| y.rem_euclid(c.y_sampling) == 0)
            .map(|c| (width / c.x_sampling as i64) as usize * c.pixel_type.bytes())
            .sum()
    }

    /// Counts channels by pixel type.
    pub fn pixel_type_counts(&self) -> [usize; 3] {
        let mut counts = [0; 3];
        for c in &self.channels {
            counts[match c.pixel_type {
                PixelType::Uint => 0,
                PixelType::Half => 1,
                PixelType::Float => 2,
            }] += 1;
        }
        counts
    }
}
