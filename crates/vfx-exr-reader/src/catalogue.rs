//! Header catalogue.
//!
//! Parses the magic number, version word and part directory, validates the
//! cross-part invariants, and keeps everything the decode engines need about
//! a file: part headers, chunk offset tables, the view list and the host
//! geometry ([`Layout`]) derived from part 0.
//!
//! # Coordinate frames
//!
//! File windows are inclusive and top-down. The host frame puts `y = 0` at
//! the display window's max-y and grows upwards, so
//!
//! ```text
//! host_y = display.max_y - file_y
//! host_x = file_x + data_offset
//! ```
//!
//! where `data_offset` is non-zero only when a display window not starting
//! at `x = 0` is shifted to the origin.

use std::io::{self, Read};
use std::ops::Range;

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::{debug, warn};
use vfx_core::{Bounds, Box2i};

use crate::attribute::{AttributeValue, Compression, LineOrder, PixelType};
use crate::config::EdgeMode;
use crate::error::{ReadError, ReadResult};
use crate::header::{flags, PartHeader, PartType};
use crate::stream::SourceStream;

/// File magic, `76 2f 31 01` on disk.
pub const MAGIC: u32 = 20_000_630;
/// Parts accepted in one file.
pub const MAX_PARTS: usize = 1024;
/// Attribute naming the hero-first list of views.
pub const MULTI_VIEW: &str = "multiView";

/// Reader adapter that counts consumed bytes.
struct Counting<R> {
    inner: R,
    consumed: u64,
}

impl<R: Read> Read for Counting<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.consumed += n as u64;
        Ok(n)
    }
}

/// Parsed file directory.
#[derive(Debug, Clone)]
pub struct Catalogue {
    /// Version word including flags.
    pub version: u32,
    /// Part headers in file order.
    pub parts: Vec<PartHeader>,
    /// Byte range of each part header, terminator included.
    pub header_spans: Vec<Range<u64>>,
    /// Byte offset of the first offset table.
    pub header_end: u64,
    /// Chunk offsets per part (empty until [`read_offset_tables`](Self::read_offset_tables)).
    pub offsets: Vec<Vec<u64>>,
    /// Known views, hero first.
    pub views: Vec<String>,
    /// Hero view, empty for single-view files.
    pub hero: String,
}

impl Catalogue {
    /// Parses magic, version and every part header.
    pub fn parse(reader: impl Read) -> ReadResult<Self> {
        let mut reader = Counting { inner: reader, consumed: 0 };
        let magic = reader.read_u32::<LittleEndian>().map_err(|e| ReadError::from_read(e, "magic number"))?;
        if magic != MAGIC {
            return Err(ReadError::Malformed(format!("not an OpenEXR file (magic {magic:#010x})")));
        }
        let version = reader.read_u32::<LittleEndian>().map_err(|e| ReadError::from_read(e, "version"))?;
        if version & 0xff != 2 {
            return Err(ReadError::UnsupportedFormat(format!("file format version {}", version & 0xff)));
        }

        let mut parts = Vec::new();
        let mut header_spans = Vec::new();
        let mut start = reader.consumed;
        if version & flags::MULTIPART != 0 {
            while let Some(header) = PartHeader::read(&mut reader, version)? {
                parts.push(header);
                header_spans.push(start..reader.consumed);
                start = reader.consumed;
                if parts.len() > MAX_PARTS {
                    return Err(ReadError::Malformed(format!("more than {MAX_PARTS} parts")));
                }
            }
        } else if let Some(header) = PartHeader::read(&mut reader, version)? {
            parts.push(header);
            header_spans.push(start..reader.consumed);
        }

        let mut catalogue = Self {
            version,
            parts,
            header_spans,
            header_end: reader.consumed,
            offsets: Vec::new(),
            views: Vec::new(),
            hero: String::new(),
        };
        catalogue.validate()?;
        catalogue.collect_views();
        debug!(
            parts = catalogue.parts.len(),
            header_bytes = catalogue.header_end,
            views = ?catalogue.views,
            "parsed exr header"
        );
        Ok(catalogue)
    }

    fn validate(&self) -> ReadResult<()> {
        let first = self.parts.first().ok_or_else(|| ReadError::Malformed("file has no parts".into()))?;
        for (index, part) in self.parts.iter().enumerate().skip(1) {
            let mismatch = if part.data_window != first.data_window {
                Some("data window")
            } else if part.display_window != first.display_window {
                Some("display window")
            } else if part.pixel_aspect != first.pixel_aspect {
                Some("pixel aspect ratio")
            } else if part.line_order != first.line_order {
                Some("line order")
            } else {
                None
            };
            if let Some(what) = mismatch {
                return Err(ReadError::Malformed(format!("multi-part {what} must be consistent (part {index})")));
            }
        }
        Ok(())
    }

    fn collect_views(&mut self) {
        let mut views: Vec<String> = Vec::new();
        let mut hero = String::new();
        for part in &self.parts {
            if let Some(AttributeValue::TextVector(list)) = part.attribute(MULTI_VIEW) {
                for view in list.iter().filter(|v| !v.is_empty()) {
                    if hero.is_empty() {
                        hero = view.clone();
                    }
                    if !views.contains(view) {
                        views.push(view.clone());
                    }
                }
            }
            if let Some(view) = part.view.as_ref().filter(|v| !v.is_empty()) {
                if !views.contains(view) {
                    views.push(view.clone());
                }
                if hero.is_empty() {
                    hero = view.clone();
                }
            }
        }
        self.views = views;
        self.hero = hero;
    }

    /// `true` when the file holds more than one part.
    pub fn is_multipart(&self) -> bool {
        self.version & flags::MULTIPART != 0
    }

    /// `true` when any part holds deep data.
    pub fn has_deep_parts(&self) -> bool {
        self.parts.iter().any(|p| p.part_type.is_deep())
    }

    /// Part 0. A parsed catalogue always has one.
    pub fn first(&self) -> &PartHeader {
        &self.parts[0]
    }

    /// Reads (or reconstructs) the chunk offset table of every part.
    ///
    /// A table that could not fit in the file is malformed.
    pub fn read_offset_tables(&mut self, stream: &mut SourceStream) -> ReadResult<()> {
        stream.seek(self.header_end)?;
        let mut tables = Vec::with_capacity(self.parts.len());
        let mut room = stream.len().saturating_sub(self.header_end) / 8;
        for (index, part) in self.parts.iter().enumerate() {
            let count = part.expected_chunk_count();
            room = room.checked_sub(count as u64).ok_or_else(|| {
                ReadError::Malformed(format!("part {index} claims {count} chunks, more than the file holds"))
            })?;
            let mut table = vec![0u64; count];
            stream
                .read_u64_into::<LittleEndian>(&mut table)
                .map_err(|e| ReadError::from_read(e, "chunk offset table"))?;
            tables.push(table);
        }

        let chunks_start = stream.tell();
        let file_len = stream.len();
        let broken: Vec<usize> = tables
            .iter()
            .enumerate()
            .filter(|(_, t)| t.iter().any(|&o| o < chunks_start || o >= file_len))
            .map(|(i, _)| i)
            .collect();
        if !broken.is_empty() {
            warn!(parts = ?broken, "chunk offset table incomplete, scanning chunks");
            let rebuilt = self.reconstruct_offsets(stream, chunks_start)?;
            for part in broken {
                tables[part] = rebuilt[part].clone();
            }
        }
        self.offsets = tables;
        Ok(())
    }

    /// Walks every chunk header after the offset tables and records where
    /// each chunk starts.
    fn reconstruct_offsets(&self, stream: &mut SourceStream, start: u64) -> ReadResult<Vec<Vec<u64>>> {
        let mut tables: Vec<Vec<u64>> = self.parts.iter().map(|p| vec![0; p.expected_chunk_count()]).collect();
        let mut next_tile = vec![0usize; self.parts.len()];
        let multipart = self.is_multipart();
        let file_len = stream.len();
        stream.seek(start)?;

        let truncated = |e| ReadError::from_read(e, "chunk header");
        while stream.tell() < file_len {
            let chunk_start = stream.tell();
            let part_index = if multipart { stream.read_i32::<LittleEndian>().map_err(truncated)? } else { 0 };
            let part = usize::try_from(part_index)
                .ok()
                .and_then(|i| self.parts.get(i).map(|p| (i, p)));
            let Some((part_index, part)) = part else {
                return Err(ReadError::Malformed(format!("chunk names part {part_index}")));
            };

            let slot = match part.part_type {
                PartType::Scanline | PartType::DeepScanline => {
                    let y = stream.read_i32::<LittleEndian>().map_err(truncated)?;
                    (y as i64 - part.data_window.min_y as i64).div_euclid(part.lines_per_block() as i64)
                }
                PartType::Tiled | PartType::DeepTiled => {
                    let mut coords = [0i32; 4];
                    stream.read_i32_into::<LittleEndian>(&mut coords).map_err(truncated)?;
                    let slot = next_tile[part_index];
                    next_tile[part_index] += 1;
                    slot as i64
                }
            };

            let skip = if part.part_type.is_deep() {
                let table = stream.read_u64::<LittleEndian>().map_err(truncated)?;
                let packed = stream.read_u64::<LittleEndian>().map_err(truncated)?;
                let _unpacked = stream.read_u64::<LittleEndian>().map_err(truncated)?;
                table.saturating_add(packed)
            } else {
                let size = stream.read_i32::<LittleEndian>().map_err(truncated)?;
                u64::try_from(size).map_err(|_| ReadError::Malformed(format!("chunk size {size}")))?
            };

            if let Some(entry) = usize::try_from(slot).ok().and_then(|s| tables[part_index].get_mut(s)) {
                *entry = chunk_start;
            }
            stream.seek(stream.tell().saturating_add(skip))?;
        }

        if let Some(part) = tables.iter().position(|t| t.contains(&0)) {
            return Err(ReadError::Truncated(format!("part {part} is missing chunks")));
        }
        Ok(tables)
    }

    /// Offset of the chunk holding file line `y` of a scanline part.
    pub fn chunk_for_line(&self, part: usize, y: i32) -> ReadResult<(usize, u64)> {
        let header = &self.parts[part];
        let index = (y as i64 - header.data_window.min_y as i64) / header.lines_per_block() as i64;
        let offset = usize::try_from(index)
            .ok()
            .and_then(|i| self.offsets.get(part)?.get(i).map(|&o| (i, o)));
        offset.ok_or_else(|| ReadError::Malformed(format!("line {y} has no chunk in part {part}")))
    }

    /// Per-part report used by tools.
    pub fn summaries(&self, layout: &Layout) -> Vec<PartSummary> {
        self.parts
            .iter()
            .map(|p| PartSummary {
                name: p.name.clone(),
                view: p.view.clone(),
                part_type: p.part_type,
                line_order: p.line_order,
                compression: p.compression,
                channels: p.channels.iter().map(|c| (c.name.clone(), c.pixel_type)).collect(),
                data_window: p.data_window,
                display_window: p.display_window,
                bbox: layout.bbox,
                format: layout.format,
            })
            .collect()
    }
}

/// Host geometry derived from part 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Added to file x to get host x.
    pub data_offset: i32,
    /// Host format, inclusive, starting at the origin.
    pub format: Box2i,
    /// Host bounding box (half-open), including any black border.
    pub bbox: Bounds,
    /// Pixels outside the data window read as black.
    pub black_outside: bool,
    /// File data window.
    pub data_window: Box2i,
    /// File display window.
    pub display_window: Box2i,
}

impl Layout {
    /// Applies the edge and display-offset policies.
    pub fn derive(header: &PartHeader, edge_mode: EdgeMode, offset_negative_display_window: bool) -> Self {
        let data = header.data_window;
        let disp = header.display_window;

        let mut data_offset = 0;
        let mut format = Box2i::new(0, 0, disp.max_x, disp.max_y - disp.min_y);
        if disp.min_x != 0 {
            if !offset_negative_display_window && disp.min_x < 0 {
                format.max_x = disp.max_x + disp.min_x;
            } else {
                data_offset = -disp.min_x;
                format.max_x = disp.max_x + data_offset;
            }
        }

        let mut bx = data.min_x + data_offset;
        let mut by = disp.max_y - data.max_y;
        let mut br = data.max_x + data_offset;
        let mut bt = disp.max_y - data.min_y;

        let differs = [
            data.min_x != disp.min_x,
            data.max_x != disp.max_x,
            data.min_y != disp.min_y,
            data.max_y != disp.max_y,
        ];
        let expand_all = match edge_mode {
            EdgeMode::Plate => differs.iter().any(|&d| d),
            EdgeMode::Edge => differs.iter().all(|&d| d),
            EdgeMode::Repeat => false,
            EdgeMode::Black => true,
        };
        if expand_all {
            bx -= 1;
            by -= 1;
            br += 1;
            bt += 1;
        } else if edge_mode == EdgeMode::Edge {
            let [min_x, max_x, min_y, max_y] = differs;
            bx -= min_x as i32;
            br += max_x as i32;
            bt += min_y as i32;
            by -= max_y as i32;
        }

        Self {
            data_offset,
            format,
            bbox: Bounds::new(bx, by, br + 1, bt + 1),
            black_outside: expand_all,
            data_window: data,
            display_window: disp,
        }
    }

    /// File line for host row `y`.
    pub fn file_y(&self, host_y: i32) -> i32 {
        self.display_window.max_y - host_y
    }

    /// Host row for file line `y`.
    pub fn host_y(&self, file_y: i32) -> i32 {
        self.display_window.max_y - file_y
    }

    /// Host box covered by the data window (no border).
    pub fn data_bounds(&self) -> Bounds {
        let d = self.data_window;
        Bounds::new(
            d.min_x + self.data_offset,
            self.host_y(d.max_y),
            d.max_x + self.data_offset + 1,
            self.host_y(d.min_y) + 1,
        )
    }

    /// Format width in pixels.
    pub fn format_width(&self) -> i64 {
        self.format.width()
    }

    /// Format height in pixels.
    pub fn format_height(&self) -> i64 {
        self.format.height()
    }
}

/// Human-oriented description of one part.
#[derive(Debug, Clone, PartialEq)]
pub struct PartSummary {
    /// `name` attribute.
    pub name: Option<String>,
    /// `view` attribute.
    pub view: Option<String>,
    /// Storage layout.
    pub part_type: PartType,
    /// Line order.
    pub line_order: LineOrder,
    /// Compression.
    pub compression: Compression,
    /// Channel names and types.
    pub channels: Vec<(String, PixelType)>,
    /// Data window.
    pub data_window: Box2i,
    /// Display window.
    pub display_window: Box2i,
    /// Derived host bounding box.
    pub bbox: Bounds,
    /// Derived host format.
    pub format: Box2i,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::tests::{attr, minimal};

    fn header(data: Box2i, disp: Box2i) -> PartHeader {
        let mut attrs = minimal(data, Compression::None);
        attrs[3] = attr("displayWindow", AttributeValue::Box2i(disp));
        PartHeader::from_attributes(attrs, 2).unwrap()
    }

    #[test]
    fn plate_keeps_full_frame() {
        let full = Box2i::new(0, 0, 3, 3);
        let layout = Layout::derive(&header(full, full), EdgeMode::Plate, true);
        assert_eq!(layout.bbox, Bounds::new(0, 0, 4, 4));
        assert!(!layout.black_outside);
        assert_eq!(layout.format, Box2i::new(0, 0, 3, 3));
    }

    #[test]
    fn black_border_around_offset_data() {
        let layout = Layout::derive(&header(Box2i::new(1, 1, 2, 2), Box2i::new(0, 0, 3, 3)), EdgeMode::Black, true);
        assert_eq!(layout.bbox, Bounds::new(0, 0, 4, 4));
        assert_eq!(layout.data_bounds(), Bounds::new(1, 1, 3, 3));
        assert_eq!(layout.file_y(2), 1);
    }

    #[test]
    fn edge_mode_expands_differing_sides() {
        // data touches the left and top of the display window only
        let layout = Layout::derive(&header(Box2i::new(0, 0, 5, 5), Box2i::new(0, 0, 9, 9)), EdgeMode::Edge, true);
        assert_eq!(layout.bbox, Bounds::new(0, 3, 7, 10));
        assert!(!layout.black_outside);

        let repeat = Layout::derive(&header(Box2i::new(0, 0, 5, 5), Box2i::new(0, 0, 9, 9)), EdgeMode::Repeat, true);
        assert_eq!(repeat.bbox, Bounds::new(0, 4, 6, 10));
    }

    #[test]
    fn negative_display_window() {
        let disp = Box2i::new(-4, 0, 19, 9);
        let shifted = Layout::derive(&header(disp, disp), EdgeMode::Plate, true);
        assert_eq!(shifted.data_offset, 4);
        assert_eq!(shifted.format, Box2i::new(0, 0, 23, 9));
        assert_eq!(shifted.bbox.x, 0);

        let cropped = Layout::derive(&header(disp, disp), EdgeMode::Plate, false);
        assert_eq!(cropped.data_offset, 0);
        // W - 2k
        assert_eq!(cropped.format.width(), 24 - 8);
        assert_eq!(cropped.bbox.x, -4);
    }

    fn single_part_bytes(attrs_bytes: &[u8]) -> Vec<u8> {
        let mut bytes = MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(attrs_bytes);
        bytes
    }

    #[test]
    fn bad_magic_is_malformed() {
        let err = Catalogue::parse(&[1u8, 2, 3, 4, 2, 0, 0, 0][..]).unwrap_err();
        assert!(matches!(err, ReadError::Malformed(_)));
        let err = Catalogue::parse(&single_part_bytes(&[])[..6]).unwrap_err();
        assert!(matches!(err, ReadError::Truncated(_)));
    }

    #[test]
    fn empty_directory_is_malformed() {
        let err = Catalogue::parse(&single_part_bytes(&[0])[..]).unwrap_err();
        assert!(matches!(err, ReadError::Malformed(ref m) if m.contains("no parts")));
    }

    #[test]
    fn chunk_count_beyond_file_is_malformed() {
        let window = Box2i::new(0, 0, 3, 3);
        let mut part = header(window, window);
        part.chunk_count = Some(i32::MAX);
        let mut catalogue = Catalogue {
            version: 2,
            parts: vec![part],
            header_spans: vec![8..8],
            header_end: 8,
            offsets: Vec::new(),
            views: Vec::new(),
            hero: String::new(),
        };
        let mut stream = SourceStream::from_bytes(vec![0; 64]);
        let err = catalogue.read_offset_tables(&mut stream).unwrap_err();
        assert!(matches!(err, ReadError::Malformed(ref m) if m.contains("more than the file holds")));
        assert!(catalogue.offsets.is_empty());
    }

    #[test]
    fn header_spans_cover_each_part() {
        let window = Box2i::new(0, 0, 0, 0);
        let mut bytes = MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&2u32.to_le_bytes());
        // R half, not linear, 1x1 sampling
        let mut chlist = b"R\0".to_vec();
        for value in [1i32, 0, 1, 1] {
            chlist.extend_from_slice(&value.to_le_bytes());
        }
        chlist.push(0);
        let zero_box = vec![0u8; 16];
        for (name, kind, value) in [
            ("channels", "chlist", chlist),
            ("compression", "compression", vec![0]),
            ("dataWindow", "box2i", zero_box.clone()),
            ("displayWindow", "box2i", zero_box),
            ("lineOrder", "lineOrder", vec![0]),
            ("pixelAspectRatio", "float", 1f32.to_le_bytes().to_vec()),
        ] {
            bytes.extend_from_slice(name.as_bytes());
            bytes.push(0);
            bytes.extend_from_slice(kind.as_bytes());
            bytes.push(0);
            bytes.extend_from_slice(&(value.len() as i32).to_le_bytes());
            bytes.extend_from_slice(&value);
        }
        bytes.push(0);
        let catalogue = Catalogue::parse(&bytes[..]).unwrap();
        assert_eq!(catalogue.first().data_window, window);
        assert_eq!(catalogue.header_spans, vec![8..bytes.len() as u64]);
        assert_eq!(catalogue.header_end, bytes.len() as u64);
        assert!(!catalogue.has_deep_parts());
    }
}
