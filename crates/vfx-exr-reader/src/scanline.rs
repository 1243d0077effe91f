//! Per-row decode engine.
//!
//! `engine(y, x, r, channels, row)` fills host row `y` over `[x, r)`. The
//! row is translated to a file line, clipped to the data window and
//! decoded part by part:
//!
//! - single-line native chunks (NONE, RLE, ZIPS) are read under the file
//!   lock into per-thread scratch and decompressed outside it;
//! - ZIP blocks are decompressed under the block lock and cached;
//! - every other codec, and tiled parts, go through the codec library.
//!
//! Native channels feeding several host channels are decoded once and
//! copied.

use vfx_core::{Box2i, Channel, ChannelSet, Row};

use crate::codec::{decompress, BlockLayout, SampleLine};
use crate::colour;
use crate::error::{ReadError, ReadResult};
use crate::header::PartHeader;
use crate::reader::{ExrReader, OpenFile};
use crate::resolver::ChannelSource;

/// Host channels a part decodes, keyed by native channel.
type PartEntries<'a> = [(&'a ChannelSource, Vec<Channel>)];

/// Span of one row being decoded, in host x.
#[derive(Debug, Clone, Copy)]
struct Span {
    /// First decoded pixel.
    x: i32,
    /// One past the last decoded pixel.
    r: i32,
    /// Left edge of the row buffer.
    row_x: i32,
    /// Sample index of `x` within a file line.
    from: usize,
}

impl Span {
    /// The part of this span a part's data window covers on file line `y`.
    fn narrow(&self, window: Box2i, offset: i32, y: i32) -> Option<Span> {
        let x = self.x.max(window.min_x + offset);
        let r = self.r.min(window.max_x + offset + 1);
        (window.min_y <= y && y <= window.max_y && x < r).then(|| Span {
            x,
            r,
            row_x: self.row_x,
            from: (x - offset - window.min_x) as usize,
        })
    }

    fn slice<'r>(&self, row: &'r mut Row, channel: Channel) -> Option<&'r mut [f32]> {
        let buf = row.writable(channel)?;
        buf.get_mut((self.x - self.row_x) as usize..(self.r - self.row_x) as usize)
    }
}

fn missing_channel(native: &str, part: usize) -> ReadError {
    ReadError::Malformed(format!("channel {native} has no data in part {part}"))
}

/// Copies one decoded native channel into every host channel it feeds.
fn store(line: SampleLine<'_>, span: Span, targets: &[Channel], row: &mut Row) {
    let stored: Vec<Channel> = targets.iter().copied().filter(|&c| row.get(c).is_some()).collect();
    let Some((&first, duplicates)) = stored.split_first() else { return };
    let Some(dst) = span.slice(row, first) else { return };
    line.copy_f32(span.from, dst);
    if duplicates.is_empty() {
        return;
    }
    let decoded = dst.to_vec();
    for &duplicate in duplicates {
        if let Some(dst) = span.slice(row, duplicate) {
            dst.copy_from_slice(&decoded);
        }
    }
}

fn store_block(
    header: &PartHeader,
    layout: &BlockLayout<'_>,
    bytes: &[u8],
    file_y: i32,
    entries: &PartEntries<'_>,
    span: Span,
    row: &mut Row,
) -> ReadResult<()> {
    for (source, targets) in entries {
        let index = header
            .channels
            .iter()
            .position(|c| c.name == source.native())
            .ok_or_else(|| missing_channel(source.native(), source.part))?;
        let line = layout
            .channel_bytes(bytes, file_y, index)
            .ok_or_else(|| ReadError::Truncated(format!("line {file_y} of channel {}", source.native())))?;
        store(SampleLine::Le(source.pixel_type(), line), span, targets, row);
    }
    Ok(())
}

impl ExrReader {
    /// Fills host row `y` over `[x, r)` with `channels`.
    ///
    /// Errors are reported to the host and leave the undecoded pixels zero;
    /// an abort returns quietly. Returns `true` when the row was completed.
    pub fn engine(&self, y: i32, x: i32, r: i32, channels: &ChannelSet, row: &mut Row) -> bool {
        let result = self.try_engine(y, x, r, channels, row);
        self.report(result)
    }

    /// [`engine`](Self::engine) with the error returned instead of reported.
    ///
    /// On failure other than an abort, `[x, r)` of every requested channel is
    /// zero, including pixels an earlier part already wrote.
    pub fn try_engine(&self, y: i32, x: i32, r: i32, channels: &ChannelSet, row: &mut Row) -> ReadResult<()> {
        let (x, r) = (x.max(row.x()), r.min(row.r()));
        let result = self.decode_row(y, x, r, channels, row);
        if result.as_ref().is_err_and(|err| !err.is_abort()) {
            for channel in channels.iter() {
                row.fill_span(channel, x, r, 0.0);
            }
        }
        result
    }

    fn decode_row(&self, y: i32, x: i32, r: i32, channels: &ChannelSet, row: &mut Row) -> ReadResult<()> {
        let Some(file) = self.file.as_ref() else {
            for channel in channels.iter() {
                row.fill_span(channel, x, r, 0.0);
            }
            return Ok(());
        };
        if self.host.aborted() {
            return Err(ReadError::Aborted);
        }

        let layout = &file.layout;
        let data = layout.data_window;
        let file_y = layout.file_y(y);
        let cx = x.max(data.min_x + layout.data_offset);
        let cr = r.min(data.max_x + layout.data_offset + 1);

        if file_y < data.min_y || file_y > data.max_y || cr <= cx {
            for channel in channels.iter() {
                row.fill_span(channel, x, r, 0.0);
            }
            return Ok(());
        }
        for channel in channels.iter() {
            row.fill_span(channel, x, cx, 0.0);
            row.fill_span(channel, cr, r, 0.0);
        }

        let curve = self.curve.as_deref().filter(|c| !c.is_linear() && !self.config.raw);
        let mut wanted = channels.clone();
        let rgb = [Channel::RED, Channel::GREEN, Channel::BLUE];
        if curve.is_some() && rgb.iter().any(|&c| channels.contains(c)) && row.get(Channel::ALPHA).is_some() {
            wanted.insert(Channel::ALPHA);
        }

        let span = Span { x: cx, r: cr, row_x: row.x(), from: 0 };
        for (part, entries) in file.channels.by_part(&wanted) {
            if self.host.aborted() {
                return Err(ReadError::Aborted);
            }
            let window = file.catalogue.parts[part].data_window;
            let narrowed = span.narrow(window, layout.data_offset, file_y);
            let covered = narrowed.map_or((cr, cr), |s| (s.x, s.r));
            for channel in entries.iter().flat_map(|(_, targets)| targets) {
                row.fill_span(*channel, cx, covered.0, 0.0);
                row.fill_span(*channel, covered.1, cr, 0.0);
            }
            if let Some(narrowed) = narrowed {
                self.decode_part_line(file, part, file_y, &entries, narrowed, row)?;
            }
        }

        let fill_alpha = self.fills_alpha(&file.channels, &wanted);
        for channel in wanted.iter().filter(|&c| file.channels.get(c).is_none()) {
            let value = if channel == Channel::ALPHA && fill_alpha { 1.0 } else { 0.0 };
            row.fill_span(channel, cx, cr, value);
        }

        if let Some(curve) = curve {
            if self.host.aborted() {
                return Err(ReadError::Aborted);
            }
            let alpha = span.slice(row, Channel::ALPHA).map(|a| a.to_vec()).filter(|_| wanted.contains(Channel::ALPHA));
            for channel in rgb.into_iter().filter(|&c| channels.contains(c)) {
                if let Some(values) = span.slice(row, channel) {
                    colour::apply(curve, values, alpha.as_deref());
                }
            }
        }
        Ok(())
    }

    fn decode_part_line(
        &self,
        file: &OpenFile,
        part: usize,
        file_y: i32,
        entries: &PartEntries<'_>,
        span: Span,
        row: &mut Row,
    ) -> ReadResult<()> {
        let header = &file.catalogue.parts[part];
        let native = header.compression.is_native() && !header.part_type.is_tiled();
        if !native {
            let decoded = file.source.decoded(&file.catalogue)?;
            let decoded_part = decoded.part(part)?;
            for (source, targets) in entries {
                let line = decoded_part
                    .line(source.native(), file_y)
                    .ok_or_else(|| missing_channel(source.native(), part))?;
                store(line, span, targets, row);
            }
            return Ok(());
        }

        let (_, offset) = file.catalogue.chunk_for_line(part, file_y)?;
        if header.compression.spans_multiple_lines() {
            return file
                .source
                .with_block(part, offset, header, |layout, bytes| {
                    store_block(header, layout, bytes, file_y, entries, span, row)
                });
        }

        file.source.with_raw_chunk(part, offset, |chunk_y, raw| {
            if chunk_y != file_y {
                return Err(ReadError::Malformed(format!("chunk for line {file_y} holds line {chunk_y}")));
            }
            let layout = BlockLayout::new(header, chunk_y);
            let bytes = decompress(header.compression, raw, layout.byte_size())?;
            store_block(header, &layout, &bytes, file_y, entries, span, row)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spans_narrow_to_part_windows() {
        let span = Span { x: 0, r: 10, row_x: -2, from: 0 };
        let window = Box2i::new(3, 0, 20, 4);
        let narrowed = span.narrow(window, 1, 2).unwrap();
        assert_eq!((narrowed.x, narrowed.r, narrowed.from), (4, 10, 0));
        assert!(span.narrow(window, 1, 5).is_none());
        assert!(span.narrow(Box2i::new(12, 0, 20, 4), 0, 0).is_none());

        let mut row = Row::new(-2, 10, &ChannelSet::rgba());
        assert_eq!(narrowed.slice(&mut row, Channel::RED).map(|s| s.len()), Some(6));
        assert!(narrowed.slice(&mut row, Channel::Z).is_none());
    }
}
