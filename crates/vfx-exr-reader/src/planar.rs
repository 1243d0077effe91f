//! Whole-plane decode engine.
//!
//! `fetch_plane` decodes every line of the data window straight into an
//! [`ImagePlane`] in the plane's own type, so half data stays bit exact.
//! Native chunks are decoded in batches across the rayon pool and stored on
//! the calling thread; library codecs decode through the shared
//! [`DecodedFile`](crate::codec::library::DecodedFile).
//!
//! Planes that do not contain the data window, files with a display offset,
//! hosts that installed a colour curve and `never_planar` all go through the
//! row engine instead.

use std::sync::Once;

use rayon::prelude::*;
use tracing::{debug, trace, warn};
use vfx_core::{Bounds, Channel, ChannelSet, ImagePlane, Row};

use crate::codec::{BlockLayout, SampleLine};
use crate::error::{ReadError, ReadResult};
use crate::header::PartHeader;
use crate::reader::{ExrReader, OpenFile};
use crate::resolver::ChannelSource;

/// Sizes the global rayon pool to `threads`, once per process.
pub fn configure_pool(threads: usize) {
    static POOL: Once = Once::new();
    POOL.call_once(|| {
        match rayon::ThreadPoolBuilder::new().num_threads(threads.max(1)).build_global() {
            Ok(()) => debug!(threads, "configured decode pool"),
            Err(err) => warn!(%err, "decode pool already configured"),
        }
    });
}

/// Where one part's lines land in the plane.
struct Placement<'a> {
    header: &'a PartHeader,
    entries: &'a [(&'a ChannelSource, Vec<Channel>)],
    /// Host columns covered.
    x: i32,
    r: i32,
    /// Sample index of `x` within a file line.
    from: usize,
}

impl Placement<'_> {
    fn store_line<'d>(
        &self,
        plane: &mut ImagePlane,
        host_y: i32,
        line: impl Fn(&ChannelSource) -> Option<SampleLine<'d>>,
    ) -> ReadResult<()> {
        for (source, targets) in self.entries {
            let samples = line(source)
                .ok_or_else(|| ReadError::Malformed(format!("channel {} has no data", source.native())))?;
            for &target in targets {
                if let Some(dst) = plane.row_span_mut(target, host_y, self.x, self.r) {
                    samples.store(self.from, dst);
                }
            }
        }
        Ok(())
    }
}

/// Sets `channel` to `value` inside `region` only.
fn fill_region(plane: &mut ImagePlane, channel: Channel, region: Bounds, value: f32) {
    let values = vec![value; region.width()];
    for y in region.y..region.t {
        if let Some(dst) = plane.row_span_mut(channel, y, region.x, region.r) {
            SampleLine::F32(&values).store(0, dst);
        }
    }
}

impl ExrReader {
    /// Fills `plane` with `channels`.
    ///
    /// Errors are reported to the host; an abort returns quietly.
    pub fn fetch_plane(&self, plane: &mut ImagePlane, channels: &ChannelSet) -> bool {
        let result = self.try_fetch_plane(plane, channels);
        self.report(result)
    }

    /// [`fetch_plane`](Self::fetch_plane) with the error returned.
    ///
    /// A failure other than an abort leaves the requested channels zero.
    pub fn try_fetch_plane(&self, plane: &mut ImagePlane, channels: &ChannelSet) -> ReadResult<()> {
        configure_pool(self.host.thread_count());
        let requested = channels.intersection(plane.channels());
        let result = self.decode_plane(plane, &requested);
        if result.as_ref().is_err_and(|err| !err.is_abort()) {
            self.clear(plane, &requested);
        }
        result
    }

    fn decode_plane(&self, plane: &mut ImagePlane, requested: &ChannelSet) -> ReadResult<()> {
        let Some(file) = self.file.as_ref() else {
            self.clear(plane, requested);
            return Ok(());
        };
        if self.host.aborted() {
            return Err(ReadError::Aborted);
        }

        let bounds = plane.bounds();
        let layout = &file.layout;
        let data_bounds = layout.data_bounds();
        let curve = self.curve.as_deref().is_some_and(|c| !c.is_linear() && !self.config.raw);
        if self.config.never_planar || layout.data_offset != 0 || curve || !bounds.contains_bounds(&data_bounds) {
            trace!(?bounds, ?data_bounds, "plane decoded row by row");
            return self.fetch_rows(plane, requested);
        }

        if bounds != data_bounds {
            self.clear(plane, requested);
        }
        let Some(rows) = bounds.intersect(&data_bounds) else {
            return Ok(());
        };

        for (part, entries) in file.channels.by_part(requested) {
            if self.host.aborted() {
                return Err(ReadError::Aborted);
            }
            let header = &file.catalogue.parts[part];
            let window = header.data_window;
            let x = rows.x.max(window.min_x);
            let r = rows.r.min(window.max_x + 1);
            if x >= r {
                continue;
            }
            let placement = Placement { header, entries: &entries, x, r, from: (x - window.min_x) as usize };
            if header.compression.is_native() && !header.part_type.is_tiled() {
                self.decode_native(file, part, &placement, plane, rows)?;
            } else {
                self.decode_library(file, part, &placement, plane, rows)?;
            }
        }

        let fill_alpha = self.fills_alpha(&file.channels, requested);
        for channel in requested.iter().filter(|&c| file.channels.get(c).is_none()) {
            let value = if channel == Channel::ALPHA && fill_alpha { plane.data_type().max_value() } else { 0.0 };
            if bounds == data_bounds {
                self.fill(plane, channel, value);
            } else if value != 0.0 {
                fill_region(plane, channel, rows, value as f32);
            }
        }
        Ok(())
    }

    fn fill(&self, plane: &mut ImagePlane, channel: Channel, value: f64) {
        if self.config.threaded_fill {
            plane.fill_channel_threaded(channel, value);
        } else {
            plane.fill_channel(channel, value);
        }
    }

    fn clear(&self, plane: &mut ImagePlane, channels: &ChannelSet) {
        for channel in channels.iter() {
            self.fill(plane, channel, 0.0);
        }
    }

    /// Row-engine fallback.
    fn fetch_rows(&self, plane: &mut ImagePlane, channels: &ChannelSet) -> ReadResult<()> {
        let bounds = plane.bounds();
        let mut row = Row::new(bounds.x, bounds.r, channels);
        for y in bounds.y..bounds.t {
            self.try_engine(y, bounds.x, bounds.r, channels, &mut row)?;
            for channel in channels.iter() {
                if let (Some(values), Some(dst)) = (row.get(channel), plane.row_mut(channel, y)) {
                    SampleLine::F32(values).store(0, dst);
                }
            }
        }
        Ok(())
    }

    fn decode_native(
        &self,
        file: &OpenFile,
        part: usize,
        placement: &Placement<'_>,
        plane: &mut ImagePlane,
        rows: Bounds,
    ) -> ReadResult<()> {
        let layout = &file.layout;
        let first_line = layout.file_y(rows.t - 1);
        let last_line = layout.file_y(rows.y);
        let window = placement.header.data_window;
        let (first_line, last_line) = (first_line.max(window.min_y), last_line.min(window.max_y));
        if first_line > last_line {
            return Ok(());
        }
        let (first_chunk, _) = file.catalogue.chunk_for_line(part, first_line)?;
        let (last_chunk, _) = file.catalogue.chunk_for_line(part, last_line)?;
        let offsets = &file.catalogue.offsets[part][first_chunk..=last_chunk];

        let batch = self.host.thread_count().max(1) * 2;
        for group in offsets.chunks(batch) {
            if self.host.aborted() {
                return Err(ReadError::Aborted);
            }
            let decoded: Vec<ReadResult<(i32, Vec<u8>)>> = group
                .par_iter()
                .map(|&offset| file.source.decode_chunk(part, offset, placement.header))
                .collect();
            for block in decoded {
                let (first_y, bytes) = block?;
                let block = BlockLayout::new(placement.header, first_y);
                for y in block.lines().filter(|y| (first_line..=last_line).contains(y)) {
                    placement.store_line(plane, layout.host_y(y), |source| {
                        let index = placement.header.channels.iter().position(|c| c.name == source.native())?;
                        let line = block.channel_bytes(&bytes, y, index)?;
                        Some(SampleLine::Le(source.pixel_type(), line))
                    })?;
                }
            }
        }
        debug!(part, chunks = offsets.len(), "plane decoded");
        Ok(())
    }

    fn decode_library(
        &self,
        file: &OpenFile,
        part: usize,
        placement: &Placement<'_>,
        plane: &mut ImagePlane,
        rows: Bounds,
    ) -> ReadResult<()> {
        let decoded = file.source.decoded(&file.catalogue)?;
        let decoded_part = decoded.part(part)?;
        let layout = &file.layout;
        let window = placement.header.data_window;
        for host_y in rows.y..rows.t {
            if self.host.aborted() {
                return Err(ReadError::Aborted);
            }
            let y = layout.file_y(host_y);
            if y < window.min_y || y > window.max_y {
                continue;
            }
            placement.store_line(plane, host_y, |source| decoded_part.line(source.native(), y))?;
        }
        Ok(())
    }
}
