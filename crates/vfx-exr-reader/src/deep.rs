//! Deep scanline decode engine.
//!
//! Decoding runs in two passes over the requested rows. The first reads each
//! chunk once, keeps it, and decodes the cumulative sample-count table so the
//! output plane can be reserved in one go. The second decompresses the
//! sample data of the kept chunks and copies every sample into the plane in
//! scan order.
//!
//! Within an unpacked chunk, samples are grouped per line, then per channel
//! in header order, then per pixel:
//!
//! ```text
//! line 0: [ch0: px0 s0..sN, px1 ..] [ch1: ..] ..
//! line 1: ..
//! ```

use std::collections::BTreeMap;

use tracing::{debug, trace};
use vfx_core::{Bounds, Channel, ChannelSet, DeepOutputPlane, MetaBundle, MetaValue, KEY_DEPTH};

use crate::attribute::PixelType;
use crate::catalogue::{Catalogue, Layout};
use crate::chunk::DeepChunk;
use crate::codec::decompress;
use crate::config::{EdgeMode, ReaderConfig};
use crate::error::{ReadError, ReadResult};
use crate::header::PartHeader;
use crate::metadata::{bump_chunk_count, publish_header, DEPTH_FLOAT, DEPTH_HALF};
use crate::reader::ExrReader;
use crate::resolver::ChannelMap;

/// Picks the deep scanline or deep tiled part to decode for `view`.
///
/// A part whose view matches wins outright, as does a part without a view
/// when `view` is `main`. Otherwise the last part of another view is used,
/// or failing that the first part without a view.
pub fn select_deep_part(catalogue: &Catalogue, view: &str) -> Option<usize> {
    let mut chosen = None;
    for (index, part) in catalogue.parts.iter().enumerate() {
        if !part.part_type.is_deep() {
            continue;
        }
        match part.view.as_deref() {
            Some(v) if v == view => return Some(index),
            Some(_) => chosen = Some(index),
            None if view == "main" => return Some(index),
            None => {
                chosen.get_or_insert(index);
            }
        }
    }
    chosen
}

/// Bit depth of a deep part. Depth channels do not count; float beats half.
fn deep_depth_label(header: &PartHeader) -> Option<&'static str> {
    let samples = header.channels.iter().filter(|c| c.name != "Z" && c.name != "ZBack");
    let mut half = false;
    for channel in samples {
        match channel.pixel_type {
            PixelType::Float => return Some(DEPTH_FLOAT),
            PixelType::Half => half = true,
            PixelType::Uint => {}
        }
    }
    half.then_some(DEPTH_HALF)
}

/// Deep part chosen at open.
#[derive(Debug, Clone)]
pub struct DeepSetup {
    /// Part index.
    pub part: usize,
    /// Host channel to native channel.
    pub channels: ChannelMap,
    /// Channels the host may request; back depth whenever front depth exists.
    pub available: ChannelSet,
    /// Host box of the deep data, border ring included.
    pub bounds: Bounds,
    /// Rows added above and below the data.
    pub added_edges: i64,
    /// Coordinate mapping of the deep part.
    pub layout: Layout,
}

impl DeepSetup {
    /// Derives the deep box and publishes the part's metadata over the
    /// file-level keys already in `metadata`.
    pub fn new(
        catalogue: &Catalogue,
        layout: &Layout,
        part: usize,
        channels: ChannelMap,
        config: &ReaderConfig,
        metadata: &mut MetaBundle,
    ) -> Self {
        let header = &catalogue.parts[part];
        let mut deep_layout = Layout::derive(header, EdgeMode::Repeat, config.offset_negative_display_window);
        deep_layout.data_offset = layout.data_offset;

        let mut available = channels.mask().clone();
        if available.contains(Channel::DEEP_FRONT) {
            available.insert(Channel::DEEP_BACK);
        }

        let data = header.data_window;
        let disp = header.display_window;
        let mut bounds = deep_layout.data_bounds();
        let mut added_edges = 0;
        if config.edge_mode != EdgeMode::Repeat && data != disp {
            let off = deep_layout.data_offset;
            let display = Bounds::new(
                disp.min_x + off,
                deep_layout.host_y(disp.max_y),
                disp.max_x + off + 1,
                deep_layout.host_y(disp.min_y) + 1,
            );
            if bounds.x > display.x {
                bounds.x -= 1;
            }
            if bounds.r < display.r {
                bounds.r += 1;
            }
            if bounds.y > display.y {
                bounds.y -= 1;
                added_edges += 1;
            }
            if bounds.t < display.t {
                bounds.t += 1;
                added_edges += 1;
            }
        }

        publish_header(header, metadata, config.do_not_attach_prefix);
        if let Some(label) = deep_depth_label(header) {
            metadata.set(KEY_DEPTH, MetaValue::Text(label.to_string()));
        }
        bump_chunk_count(metadata, added_edges);

        debug!(part, ?bounds, added_edges, channels = available.len(), "deep part selected");
        Self { part, channels, available, bounds, added_edges, layout: deep_layout }
    }
}

/// One chunk kept between the passes.
#[derive(Debug)]
struct KeptChunk {
    raw: DeepChunk,
    /// Cumulative counts, `width` per line, restarting on every line.
    cumulative: Vec<u32>,
    /// Unpacked sample data, filled by the second pass.
    samples: Option<Vec<u8>>,
}

impl KeptChunk {
    fn line(&self, index: usize, width: usize) -> &[u32] {
        &self.cumulative[index * width..(index + 1) * width]
    }

    /// Samples on line `index`.
    fn line_total(&self, index: usize, width: usize) -> usize {
        self.line(index, width).last().map_or(0, |&n| n as usize)
    }
}

/// Decodes a packed count table into validated cumulative counts.
fn count_table(header: &PartHeader, chunk: &DeepChunk, lines: usize, width: usize) -> ReadResult<Vec<u32>> {
    let table = decompress(header.compression, &chunk.table, lines * width * 4)?;
    let mut cumulative = Vec::with_capacity(lines * width);
    for line in table.chunks_exact(width * 4) {
        let mut previous = 0u32;
        for bytes in line.chunks_exact(4) {
            let value = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            let value = u32::try_from(value)
                .ok()
                .filter(|&v| v >= previous)
                .ok_or_else(|| ReadError::Malformed(format!("sample count table of line {} decreases", chunk.y)))?;
            cumulative.push(value);
            previous = value;
        }
    }
    Ok(cumulative)
}

impl ExrReader {
    /// Deep box and channels, when the file has a usable deep part.
    pub fn deep_info(&self) -> Option<(Bounds, &ChannelSet)> {
        let deep = self.file.as_ref()?.deep.as_ref()?;
        Some((deep.bounds, &deep.available))
    }

    /// Fills `plane` with the deep samples of `bounds`.
    ///
    /// The plane is recreated for `bounds` and `channels`. Errors are
    /// reported to the host; an abort returns quietly.
    pub fn do_deep_engine(&self, bounds: Bounds, channels: &ChannelSet, plane: &mut DeepOutputPlane) -> bool {
        let result = self.try_deep_engine(bounds, channels, plane);
        self.report(result)
    }

    /// [`do_deep_engine`](Self::do_deep_engine) with the error returned.
    pub fn try_deep_engine(&self, bounds: Bounds, channels: &ChannelSet, plane: &mut DeepOutputPlane) -> ReadResult<()> {
        *plane = DeepOutputPlane::new(bounds, channels.clone());
        let file = self.opened()?;
        let deep = file
            .deep
            .as_ref()
            .ok_or_else(|| ReadError::UnsupportedFormat("no deep data found in file".into()))?;
        let header = &file.catalogue.parts[deep.part];
        if header.part_type.is_tiled() {
            return Err(ReadError::UnsupportedFormat("deep tiled parts are not supported".into()));
        }

        let layout = &deep.layout;
        let data = header.data_window;
        let width = data.width() as usize;
        let lines_per_block = header.lines_per_block() as i64;

        // Pass 1: read every chunk the box touches and count its samples.
        let mut kept: Vec<KeptChunk> = Vec::new();
        let mut by_offset: BTreeMap<u64, usize> = BTreeMap::new();
        let mut rows: Vec<Option<(usize, usize)>> = Vec::with_capacity(bounds.height());
        let mut total = 0usize;
        for y in bounds.y..bounds.t {
            if self.host.aborted() {
                return Err(ReadError::Aborted);
            }
            let file_y = layout.file_y(y);
            if file_y < data.min_y || file_y > data.max_y {
                rows.push(None);
                continue;
            }
            let (_, offset) = file.catalogue.chunk_for_line(deep.part, file_y)?;
            let index = match by_offset.get(&offset) {
                Some(&index) => index,
                None => {
                    let raw = file.source.read_deep_chunk(deep.part, offset)?;
                    let first = data.min_y as i64 + (file_y as i64 - data.min_y as i64) / lines_per_block * lines_per_block;
                    if raw.y as i64 != first {
                        return Err(ReadError::Malformed(format!("deep chunk for line {file_y} starts at {}", raw.y)));
                    }
                    let lines = (data.max_y as i64 - first + 1).min(lines_per_block) as usize;
                    let cumulative = count_table(header, &raw, lines, width)?;
                    trace!(y = raw.y, lines, "deep chunk counted");
                    kept.push(KeptChunk { raw, cumulative, samples: None });
                    by_offset.insert(offset, kept.len() - 1);
                    kept.len() - 1
                }
            };
            let line = (file_y - kept[index].raw.y) as usize;
            total += kept[index].line_total(line, width);
            rows.push(Some((index, line)));
        }

        plane.reserve_samples(total);
        debug!(rows = rows.len(), chunks = kept.len(), total, "deep samples counted");

        // Header-order channel offsets, in bytes per sample.
        let mut channel_starts = Vec::with_capacity(header.channels.len());
        let mut sample_bytes = 0;
        for channel in &header.channels {
            channel_starts.push(sample_bytes);
            sample_bytes += channel.pixel_type.bytes();
        }
        let sources: Vec<Option<(usize, PixelType)>> = channels
            .iter()
            .map(|channel| {
                let source = deep
                    .channels
                    .get(channel)
                    .or_else(|| (channel == Channel::DEEP_BACK).then(|| deep.channels.get(Channel::DEEP_FRONT)).flatten())?;
                let index = header.channels.iter().position(|c| c.name == source.native())?;
                Some((index, source.pixel_type()))
            })
            .collect();
        let stride = channels.len();

        // Pass 2: unpack and copy.
        for (y, row) in (bounds.y..bounds.t).zip(rows) {
            if self.host.aborted() {
                return Err(ReadError::Aborted);
            }
            let Some((index, line)) = row else {
                for x in bounds.x..bounds.r {
                    plane.set_sample_count(y, x, 0)?;
                }
                continue;
            };

            let chunk = &mut kept[index];
            if chunk.samples.is_none() {
                let unpacked = decompress(header.compression, &chunk.raw.samples, chunk.raw.unpacked_size)?;
                chunk.samples = Some(unpacked.into_owned());
            }
            let chunk = &kept[index];
            let samples = chunk.samples.as_deref().unwrap_or_default();
            let line_start: usize = (0..line).map(|l| chunk.line_total(l, width) * sample_bytes).sum();
            let line_total = chunk.line_total(line, width);
            let cumulative = chunk.line(line, width);

            for x in bounds.x..bounds.r {
                let file_x = x - layout.data_offset;
                let Some(px) = usize::try_from(file_x - data.min_x).ok().filter(|&px| px < width) else {
                    plane.set_sample_count(y, x, 0)?;
                    continue;
                };
                let first = if px == 0 { 0 } else { cumulative[px - 1] as usize };
                let count = cumulative[px] as usize - first;
                plane.set_sample_count(y, x, count as u32)?;
                if count == 0 {
                    continue;
                }
                let out = plane.writable(y, x)?;
                for (c, source) in sources.iter().enumerate() {
                    let Some((native, pixel_type)) = *source else { continue };
                    let size = pixel_type.bytes();
                    let start = line_start + line_total * channel_starts[native] + first * size;
                    let bytes = samples.get(start..start + count * size).ok_or_else(|| {
                        ReadError::Truncated(format!("deep samples of line {}", layout.file_y(y)))
                    })?;
                    for (s, value) in bytes.chunks_exact(size).enumerate() {
                        out[s * stride + c] = pixel_type.decode_le(value);
                    }
                }
            }
        }
        Ok(())
    }
}
