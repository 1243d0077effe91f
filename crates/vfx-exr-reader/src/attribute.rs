//! Typed header attributes.
//!
//! An attribute on disk is `name\0 type\0 size:i32 value`. [`read_attribute`]
//! pulls one record off a reader and [`AttributeValue::parse`] turns the value
//! bytes into a typed value. Types the reader does not know are kept as
//! [`AttributeValue::Custom`] so nothing in the bag is lost.

use std::fmt;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use smallvec::SmallVec;
use vfx_core::Box2i;

use crate::error::{ReadError, ReadResult};

/// Longest attribute or channel name without the long-names flag.
pub const SHORT_NAME_LIMIT: usize = 31;
/// Longest name with the long-names flag.
pub const LONG_NAME_LIMIT: usize = 255;
/// Upper bound on one attribute's value size.
const MAX_ATTRIBUTE_BYTES: i32 = 1 << 28;

/// Per-sample storage type of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PixelType {
    /// 32-bit unsigned integer.
    Uint,
    /// 16-bit float.
    Half,
    /// 32-bit float.
    Float,
}

impl PixelType {
    fn from_code(code: i32) -> ReadResult<Self> {
        match code {
            0 => Ok(PixelType::Uint),
            1 => Ok(PixelType::Half),
            2 => Ok(PixelType::Float),
            other => Err(ReadError::Malformed(format!("unknown pixel type {other}"))),
        }
    }

    /// Bytes per sample on disk.
    pub const fn bytes(self) -> usize {
        match self {
            PixelType::Half => 2,
            PixelType::Uint | PixelType::Float => 4,
        }
    }

    /// Decodes one little-endian sample to `f32`.
    #[inline]
    pub fn decode_le(self, bytes: &[u8]) -> f32 {
        match self {
            PixelType::Half => half::f16::from_le_bytes([bytes[0], bytes[1]]).to_f32(),
            PixelType::Float => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            PixelType::Uint => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32,
        }
    }
}

impl fmt::Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PixelType::Uint => "uint",
            PixelType::Half => "half",
            PixelType::Float => "float",
        })
    }
}

/// One entry of a `chlist` attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelDesc {
    /// File-native name, e.g. `diffuse.R`.
    pub name: String,
    /// Storage type.
    pub pixel_type: PixelType,
    /// Perceptually linear hint.
    pub p_linear: bool,
    /// Horizontal sub-sampling.
    pub x_sampling: i32,
    /// Vertical sub-sampling.
    pub y_sampling: i32,
}

impl ChannelDesc {
    /// `true` when the channel has one sample per pixel.
    pub fn is_full_rate(&self) -> bool {
        self.x_sampling == 1 && self.y_sampling == 1
    }
}

/// Channel list in file order (alphabetical by name for conforming files).
pub type ChannelList = SmallVec<[ChannelDesc; 8]>;

/// Compression code of a part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Compression {
    /// Uncompressed.
    #[default]
    None,
    /// Run-length encoding.
    Rle,
    /// zlib, one line per chunk.
    Zips,
    /// zlib, 16 lines per chunk.
    Zip,
    /// Wavelet + Huffman.
    Piz,
    /// Lossy 24-bit float.
    Pxr24,
    /// Lossy 4x4 blocks.
    B44,
    /// B44 with flat-area optimisation.
    B44a,
    /// DCT, 32 lines per chunk.
    Dwaa,
    /// DCT, 256 lines per chunk.
    Dwab,
}

impl Compression {
    fn from_code(code: u8) -> ReadResult<Self> {
        Ok(match code {
            0 => Compression::None,
            1 => Compression::Rle,
            2 => Compression::Zips,
            3 => Compression::Zip,
            4 => Compression::Piz,
            5 => Compression::Pxr24,
            6 => Compression::B44,
            7 => Compression::B44a,
            8 => Compression::Dwaa,
            9 => Compression::Dwab,
            other => return Err(ReadError::UnsupportedFormat(format!("compression code {other}"))),
        })
    }

    /// Scanlines held by one chunk.
    pub const fn lines_per_block(self) -> usize {
        match self {
            Compression::None | Compression::Rle | Compression::Zips => 1,
            Compression::Zip | Compression::Pxr24 => 16,
            Compression::Piz | Compression::B44 | Compression::B44a | Compression::Dwaa => 32,
            Compression::Dwab => 256,
        }
    }

    /// Decoded by this crate rather than the codec library.
    pub const fn is_native(self) -> bool {
        matches!(self, Compression::None | Compression::Rle | Compression::Zips | Compression::Zip)
    }

    /// Chunks span several scanlines.
    pub const fn spans_multiple_lines(self) -> bool {
        self.lines_per_block() > 1
    }

    /// Name as written by OpenEXR tools.
    pub const fn name(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Rle => "rle",
            Compression::Zips => "zips",
            Compression::Zip => "zip",
            Compression::Piz => "piz",
            Compression::Pxr24 => "pxr24",
            Compression::B44 => "b44",
            Compression::B44a => "b44a",
            Compression::Dwaa => "dwaa",
            Compression::Dwab => "dwab",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Order chunks were written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineOrder {
    /// Top to bottom.
    #[default]
    IncreasingY,
    /// Bottom to top.
    DecreasingY,
    /// Any order (tiled only).
    RandomY,
}

impl LineOrder {
    fn from_code(code: u8) -> ReadResult<Self> {
        match code {
            0 => Ok(LineOrder::IncreasingY),
            1 => Ok(LineOrder::DecreasingY),
            2 => Ok(LineOrder::RandomY),
            other => Err(ReadError::Malformed(format!("line order {other}"))),
        }
    }
}

impl fmt::Display for LineOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LineOrder::IncreasingY => "increasing_y",
            LineOrder::DecreasingY => "decreasing_y",
            LineOrder::RandomY => "random_y",
        })
    }
}

/// Level layout of a tiled part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelMode {
    /// Full resolution only.
    One,
    /// Square mip levels.
    Mipmap,
    /// Independent x/y levels.
    Ripmap,
}

/// `tiledesc` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileDesc {
    /// Tile width.
    pub x_size: u32,
    /// Tile height.
    pub y_size: u32,
    /// Level layout.
    pub mode: LevelMode,
    /// Level sizes round up rather than down.
    pub round_up: bool,
}

impl TileDesc {
    fn level_size(self, full: i64, level: u32) -> i64 {
        let size = if self.round_up {
            (full + (1 << level) - 1) >> level
        } else {
            full >> level
        };
        size.max(1)
    }

    fn level_count(self, full: i64) -> u32 {
        let mut levels = 1;
        while self.level_size(full, levels - 1) > 1 {
            levels += 1;
        }
        levels
    }

    /// Chunk count for a `width` x `height` data window.
    pub fn chunk_count(self, width: i64, height: i64) -> usize {
        let tiles = |w: i64, h: i64| {
            let tx = (w + self.x_size as i64 - 1) / self.x_size.max(1) as i64;
            let ty = (h + self.y_size as i64 - 1) / self.y_size.max(1) as i64;
            (tx * ty) as usize
        };
        match self.mode {
            LevelMode::One => tiles(width, height),
            LevelMode::Mipmap => {
                let levels = self.level_count(width.max(height));
                (0..levels)
                    .map(|l| tiles(self.level_size(width, l), self.level_size(height, l)))
                    .sum()
            }
            LevelMode::Ripmap => {
                let (lx, ly) = (self.level_count(width), self.level_count(height));
                (0..ly)
                    .flat_map(|y| (0..lx).map(move |x| (x, y)))
                    .map(|(x, y)| tiles(self.level_size(width, x), self.level_size(height, y)))
                    .sum()
            }
        }
    }
}

/// Typed attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// `box2i`
    Box2i(Box2i),
    /// `box2f` as min x, min y, max x, max y.
    Box2f([f32; 4]),
    /// `chlist`
    Channels(ChannelList),
    /// `chromaticities`: red, green, blue, white xy pairs.
    Chromaticities([f32; 8]),
    /// `compression`
    Compression(Compression),
    /// `double`
    Double(f64),
    /// `envmap`
    EnvMap(u8),
    /// `float`
    Float(f32),
    /// `int`
    Int(i32),
    /// `keycode`
    KeyCode([i32; 7]),
    /// `lineOrder`
    LineOrder(LineOrder),
    /// `m33f`, row major.
    M33f([f32; 9]),
    /// `m44f`, row major.
    M44f([f32; 16]),
    /// `preview`; pixels are skipped.
    Preview {
        /// Width.
        width: u32,
        /// Height.
        height: u32,
    },
    /// `rational`
    Rational(i32, u32),
    /// `string`
    Text(String),
    /// `stringvector`
    TextVector(Vec<String>),
    /// `tiledesc`
    Tiles(TileDesc),
    /// `timecode`: time and control word, user data.
    TimeCode(u32, u32),
    /// `v2i`
    V2i([i32; 2]),
    /// `v2f`
    V2f([f32; 2]),
    /// `v3i`
    V3i([i32; 3]),
    /// `v3f`
    V3f([f32; 3]),
    /// `deepImageState`
    DeepImageState(u8),
    /// Any other type, bytes verbatim.
    Custom {
        /// Type name.
        kind: String,
        /// Raw value.
        bytes: Vec<u8>,
    },
}

/// Name, type name and value of one header record.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    /// Attribute name.
    pub name: String,
    /// Type name as stored.
    pub kind: String,
    /// Parsed value.
    pub value: AttributeValue,
}

fn truncated(what: &str) -> impl Fn(std::io::Error) -> ReadError + '_ {
    move |e| ReadError::from_read(e, what)
}

/// Reads a null-terminated name of at most `limit` bytes.
///
/// Returns an empty string for the terminating `\0` of an attribute list.
pub(crate) fn read_name(reader: &mut impl Read, limit: usize) -> ReadResult<String> {
    let mut bytes = Vec::with_capacity(32);
    loop {
        let byte = reader.read_u8().map_err(truncated("attribute name"))?;
        if byte == 0 {
            break;
        }
        if bytes.len() == limit {
            return Err(ReadError::Malformed(format!(
                "name longer than {limit} bytes: {:?}...",
                String::from_utf8_lossy(&bytes)
            )));
        }
        bytes.push(byte);
    }
    String::from_utf8(bytes).map_err(|e| ReadError::Malformed(format!("name is not UTF-8: {e}")))
}

/// Reads one attribute record, or `None` at the end of the list.
pub fn read_attribute(reader: &mut impl Read, long_names: bool) -> ReadResult<Option<Attribute>> {
    let limit = if long_names { LONG_NAME_LIMIT } else { SHORT_NAME_LIMIT };
    let name = read_name(reader, limit)?;
    if name.is_empty() {
        return Ok(None);
    }
    let kind = read_name(reader, limit)?;
    let size = reader.read_i32::<LittleEndian>().map_err(truncated("attribute size"))?;
    if !(0..=MAX_ATTRIBUTE_BYTES).contains(&size) {
        return Err(ReadError::Malformed(format!("attribute {name} has invalid size {size}")));
    }
    let mut bytes = vec![0; size as usize];
    reader.read_exact(&mut bytes).map_err(truncated("attribute value"))?;
    let value = AttributeValue::parse(&kind, bytes)
        .map_err(|e| ReadError::Malformed(format!("attribute {name} ({kind}): {e}")))?;
    Ok(Some(Attribute { name, kind, value }))
}

fn read_f32s<const N: usize>(r: &mut impl Read) -> std::io::Result<[f32; N]> {
    let mut out = [0.0; N];
    r.read_f32_into::<LittleEndian>(&mut out)?;
    Ok(out)
}

fn read_i32s<const N: usize>(r: &mut impl Read) -> std::io::Result<[i32; N]> {
    let mut out = [0; N];
    r.read_i32_into::<LittleEndian>(&mut out)?;
    Ok(out)
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn read_channel_list(r: &mut Cursor<Vec<u8>>) -> ReadResult<ChannelList> {
    let mut list = ChannelList::new();
    loop {
        let name = read_name(r, LONG_NAME_LIMIT)?;
        if name.is_empty() {
            return Ok(list);
        }
        let pixel_type = PixelType::from_code(r.read_i32::<LittleEndian>()?)?;
        let p_linear = r.read_u8()? != 0;
        let mut reserved = [0u8; 3];
        r.read_exact(&mut reserved)?;
        let x_sampling = r.read_i32::<LittleEndian>()?;
        let y_sampling = r.read_i32::<LittleEndian>()?;
        if x_sampling < 1 || y_sampling < 1 {
            return Err(ReadError::Malformed(format!(
                "channel {name} has sampling {x_sampling}x{y_sampling}"
            )));
        }
        list.push(ChannelDesc { name, pixel_type, p_linear, x_sampling, y_sampling });
    }
}

impl AttributeValue {
    /// Decodes the value bytes of an attribute of type `kind`.
    pub fn parse(kind: &str, bytes: Vec<u8>) -> ReadResult<Self> {
        let mut r = Cursor::new(bytes);
        let value = match kind {
            "box2i" => {
                let [a, b, c, d] = read_i32s::<4>(&mut r)?;
                AttributeValue::Box2i(Box2i::new(a, b, c, d))
            }
            "box2f" => AttributeValue::Box2f(read_f32s(&mut r)?),
            "chlist" => AttributeValue::Channels(read_channel_list(&mut r)?),
            "chromaticities" => AttributeValue::Chromaticities(read_f32s(&mut r)?),
            "compression" => AttributeValue::Compression(Compression::from_code(r.read_u8()?)?),
            "double" => AttributeValue::Double(r.read_f64::<LittleEndian>()?),
            "envmap" => AttributeValue::EnvMap(r.read_u8()?),
            "float" => AttributeValue::Float(r.read_f32::<LittleEndian>()?),
            "int" => AttributeValue::Int(r.read_i32::<LittleEndian>()?),
            "keycode" => AttributeValue::KeyCode(read_i32s(&mut r)?),
            "lineOrder" => AttributeValue::LineOrder(LineOrder::from_code(r.read_u8()?)?),
            "m33f" => AttributeValue::M33f(read_f32s(&mut r)?),
            "m44f" => AttributeValue::M44f(read_f32s(&mut r)?),
            "preview" => AttributeValue::Preview {
                width: r.read_u32::<LittleEndian>()?,
                height: r.read_u32::<LittleEndian>()?,
            },
            "rational" => AttributeValue::Rational(r.read_i32::<LittleEndian>()?, r.read_u32::<LittleEndian>()?),
            "string" => AttributeValue::Text(text(r.get_ref())),
            "stringvector" => {
                let mut items = Vec::new();
                let total = r.get_ref().len() as u64;
                while r.position() < total {
                    let len = r.read_i32::<LittleEndian>()?;
                    if len < 0 {
                        return Err(ReadError::Malformed(format!("string length {len}")));
                    }
                    let mut item = vec![0; len as usize];
                    r.read_exact(&mut item)?;
                    items.push(text(&item));
                }
                AttributeValue::TextVector(items)
            }
            "tiledesc" => {
                let x_size = r.read_u32::<LittleEndian>()?;
                let y_size = r.read_u32::<LittleEndian>()?;
                let mode = r.read_u8()?;
                let level = match mode & 0x0f {
                    0 => LevelMode::One,
                    1 => LevelMode::Mipmap,
                    2 => LevelMode::Ripmap,
                    other => return Err(ReadError::Malformed(format!("level mode {other}"))),
                };
                if x_size == 0 || y_size == 0 {
                    return Err(ReadError::Malformed(format!("tile size {x_size}x{y_size}")));
                }
                AttributeValue::Tiles(TileDesc { x_size, y_size, mode: level, round_up: mode >> 4 == 1 })
            }
            "timecode" => AttributeValue::TimeCode(r.read_u32::<LittleEndian>()?, r.read_u32::<LittleEndian>()?),
            "v2i" => AttributeValue::V2i(read_i32s(&mut r)?),
            "v2f" => AttributeValue::V2f(read_f32s(&mut r)?),
            "v3i" => AttributeValue::V3i(read_i32s(&mut r)?),
            "v3f" => AttributeValue::V3f(read_f32s(&mut r)?),
            "deepImageState" => AttributeValue::DeepImageState(r.read_u8()?),
            _ => AttributeValue::Custom { kind: kind.to_string(), bytes: r.into_inner() },
        };
        Ok(value)
    }

    /// The value as a string, for `string` attributes.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }
}
