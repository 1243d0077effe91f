//! Chunk decompression.
//!
//! NONE, RLE, ZIPS and ZIP chunks are decoded here. Everything else goes
//! through the codec library in [`library`], which is the one place its
//! errors are translated.
//!
//! # Native pipeline
//!
//! ```text
//! compressed -> rle / zlib -> differences_to_samples -> interleave -> little-endian block
//! ```
//!
//! A chunk whose stored size equals its uncompressed size was written raw
//! and is used as-is.

use std::borrow::Cow;
use std::ops::Range;

use half::f16;
use smallvec::SmallVec;
use vfx_core::PlaneRowMut;

use crate::attribute::{Compression, PixelType};
use crate::error::{ReadError, ReadResult};
use crate::header::PartHeader;

pub mod library;
pub mod rle;
pub mod zip;

/// Undoes the byte predictor: every byte is stored as the difference to its
/// predecessor, offset by 128.
pub fn differences_to_samples(buffer: &mut [u8]) {
    for i in 1..buffer.len() {
        buffer[i] = buffer[i - 1].wrapping_add(buffer[i]).wrapping_sub(128);
    }
}

/// Re-interleaves the two half-blocks the encoder split the data into.
pub fn interleave_byte_blocks(separated: &mut [u8]) {
    let mut interleaved = Vec::with_capacity(separated.len());
    let (first, second) = separated.split_at((separated.len() + 1) / 2);
    let mut second = second.iter();
    for &byte in first {
        interleaved.push(byte);
        if let Some(&next) = second.next() {
            interleaved.push(next);
        }
    }
    separated.copy_from_slice(&interleaved);
}

/// Decompresses one chunk of a native codec into the uncompressed
/// little-endian block of `expected_size` bytes.
pub fn decompress<'d>(compression: Compression, data: &'d [u8], expected_size: usize) -> ReadResult<Cow<'d, [u8]>> {
    if compression == Compression::None || data.len() == expected_size {
        if data.len() != expected_size {
            return Err(ReadError::Malformed(format!(
                "uncompressed chunk holds {} bytes, expected {expected_size}",
                data.len()
            )));
        }
        return Ok(Cow::Borrowed(data));
    }

    let mut bytes = match compression {
        Compression::Rle => rle::decompress_raw(data, expected_size)?,
        Compression::Zips | Compression::Zip => zip::decompress_raw(data, expected_size)?,
        other => {
            return Err(ReadError::UnsupportedFormat(format!("{other} chunks are decoded by the codec library")));
        }
    };
    differences_to_samples(&mut bytes);
    interleave_byte_blocks(&mut bytes);
    Ok(Cow::Owned(bytes))
}

/// Converts little-endian samples of `pixel_type` to `f32`.
pub fn decode_samples(pixel_type: PixelType, src: &[u8], dst: &mut [f32]) {
    let step = pixel_type.bytes();
    for (value, bytes) in dst.iter_mut().zip(src.chunks_exact(step)) {
        *value = pixel_type.decode_le(bytes);
    }
}

/// One channel's samples along one file line.
#[derive(Debug, Clone, Copy)]
pub enum SampleLine<'a> {
    /// Little-endian bytes straight out of a block.
    Le(PixelType, &'a [u8]),
    /// Decoded half floats.
    F16(&'a [f16]),
    /// Decoded floats.
    F32(&'a [f32]),
    /// Decoded unsigned integers.
    U32(&'a [u32]),
}

impl SampleLine<'_> {
    /// Number of samples.
    pub fn len(&self) -> usize {
        match self {
            SampleLine::Le(t, bytes) => bytes.len() / t.bytes(),
            SampleLine::F16(v) => v.len(),
            SampleLine::F32(v) => v.len(),
            SampleLine::U32(v) => v.len(),
        }
    }

    /// `true` when the line holds no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn f16_at(&self, i: usize) -> f16 {
        match self {
            SampleLine::Le(PixelType::Half, b) => f16::from_le_bytes([b[2 * i], b[2 * i + 1]]),
            SampleLine::F16(v) => v[i],
            _ => f16::from_f32(self.f32_at(i)),
        }
    }

    fn u32_at(&self, i: usize) -> u32 {
        match self {
            SampleLine::Le(PixelType::Uint, b) => u32::from_le_bytes([b[4 * i], b[4 * i + 1], b[4 * i + 2], b[4 * i + 3]]),
            SampleLine::U32(v) => v[i],
            _ => {
                let v = self.f32_at(i);
                if v.is_nan() { 0 } else { v.clamp(0.0, u32::MAX as f32) as u32 }
            }
        }
    }

    /// Sample `i` as `f32`.
    #[inline]
    pub fn f32_at(&self, i: usize) -> f32 {
        match self {
            SampleLine::Le(t, b) => {
                let n = t.bytes();
                t.decode_le(&b[n * i..n * (i + 1)])
            }
            SampleLine::F16(v) => v[i].to_f32(),
            SampleLine::F32(v) => v[i],
            SampleLine::U32(v) => v[i] as f32,
        }
    }

    /// Converts samples `[from, from + dst.len())` to `f32`.
    pub fn copy_f32(&self, from: usize, dst: &mut [f32]) {
        match self {
            SampleLine::Le(t, bytes) => decode_samples(*t, &bytes[from * t.bytes()..], dst),
            SampleLine::F32(v) => dst.copy_from_slice(&v[from..from + dst.len()]),
            _ => {
                for (i, value) in dst.iter_mut().enumerate() {
                    *value = self.f32_at(from + i);
                }
            }
        }
    }

    /// Stores samples `[from, from + n)` into a plane row of any type, where
    /// `n` is the row length. Same-type copies are bit exact.
    pub fn store(&self, from: usize, dst: PlaneRowMut<'_>) {
        match dst {
            PlaneRowMut::F32(row) => self.copy_f32(from, row),
            PlaneRowMut::F16(row) => {
                for (i, value) in row.iter_mut().enumerate() {
                    *value = self.f16_at(from + i);
                }
            }
            PlaneRowMut::U32(row) => {
                for (i, value) in row.iter_mut().enumerate() {
                    *value = self.u32_at(from + i);
                }
            }
            PlaneRowMut::U16(row) => {
                for (i, value) in row.iter_mut().enumerate() {
                    *value = (self.f32_at(from + i).clamp(0.0, 1.0) * u16::MAX as f32).round() as u16;
                }
            }
            PlaneRowMut::U8(row) => {
                for (i, value) in row.iter_mut().enumerate() {
                    *value = (self.f32_at(from + i).clamp(0.0, 1.0) * u8::MAX as f32).round() as u8;
                }
            }
        }
    }
}

/// Byte layout of one uncompressed scanline block.
///
/// Lines are stored top-down; within a line each channel in header order
/// holds `width / x_sampling` samples, and a sub-sampled channel only
/// appears on lines divisible by its `y_sampling`.
#[derive(Debug, Clone)]
pub struct BlockLayout<'h> {
    header: &'h PartHeader,
    first_y: i32,
    line_offsets: SmallVec<[usize; 32]>,
    total: usize,
}

impl<'h> BlockLayout<'h> {
    /// Layout of the chunk starting at file line `first_y`.
    pub fn new(header: &'h PartHeader, first_y: i32) -> Self {
        let last_y = (first_y as i64 + header.lines_per_block() as i64 - 1).min(header.data_window.max_y as i64) as i32;
        let mut line_offsets = SmallVec::new();
        let mut total = 0;
        for y in first_y..=last_y {
            line_offsets.push(total);
            total += header.line_bytes(y);
        }
        Self { header, first_y, line_offsets, total }
    }

    /// Layout of the chunk holding file line `y`.
    pub fn for_line(header: &'h PartHeader, y: i32) -> Self {
        let lines = header.lines_per_block() as i64;
        let first = header.data_window.min_y as i64 + (y as i64 - header.data_window.min_y as i64) / lines * lines;
        Self::new(header, first as i32)
    }

    /// First file line.
    pub fn first_y(&self) -> i32 {
        self.first_y
    }

    /// Lines in the block.
    pub fn lines(&self) -> Range<i32> {
        self.first_y..self.first_y + self.line_offsets.len() as i32
    }

    /// Uncompressed size in bytes.
    pub fn byte_size(&self) -> usize {
        self.total
    }

    /// Bytes of channel `index` on line `y`, `None` if the channel is not
    /// sampled there or the line is outside the block.
    pub fn channel_bytes<'d>(&self, data: &'d [u8], y: i32, index: usize) -> Option<&'d [u8]> {
        let line = usize::try_from(y - self.first_y).ok()?;
        let mut offset = *self.line_offsets.get(line)?;
        let width = self.header.data_window.width();
        for (i, channel) in self.header.channels.iter().enumerate() {
            if y.rem_euclid(channel.y_sampling) != 0 {
                continue;
            }
            let len = (width / channel.x_sampling as i64) as usize * channel.pixel_type.bytes();
            if i == index {
                return data.get(offset..offset + len);
            }
            offset += len;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeValue;
    use crate::header::tests::{attr, channel, minimal};
    use smallvec::smallvec;
    use vfx_core::Box2i;

    #[test]
    fn predictor_and_interleave() {
        let mut bytes = vec![10u8, 128 + 1, 128 + 2];
        differences_to_samples(&mut bytes);
        assert_eq!(bytes, vec![10, 11, 13]);

        let mut split = vec![1u8, 3, 5, 2, 4];
        interleave_byte_blocks(&mut split);
        assert_eq!(split, vec![1, 2, 3, 4, 5]);

        let mut even = vec![1u8, 3, 2, 4];
        interleave_byte_blocks(&mut even);
        assert_eq!(even, vec![1, 2, 3, 4]);
    }

    #[test]
    fn raw_chunks_pass_through() {
        let data = [1u8, 2, 3, 4];
        assert!(matches!(decompress(Compression::Zip, &data, 4).unwrap(), Cow::Borrowed(_)));
        assert!(decompress(Compression::None, &data, 5).is_err());
        assert!(matches!(decompress(Compression::Piz, &data, 8), Err(ReadError::UnsupportedFormat(_))));
    }

    #[test]
    fn zip_pipeline() {
        // the encoder side: split into even/odd halves, then delta-encode
        let raw: Vec<u8> = (0u8..64).map(|i| i.wrapping_mul(7)).collect();
        let mut split: Vec<u8> = raw.iter().step_by(2).chain(raw.iter().skip(1).step_by(2)).copied().collect();
        let mut previous = split[0];
        for byte in split.iter_mut().skip(1) {
            let current = *byte;
            *byte = current.wrapping_sub(previous).wrapping_add(128);
            previous = current;
        }
        let compressed = miniz_oxide::deflate::compress_to_vec_zlib(&split, 6);
        assert_eq!(decompress(Compression::Zips, &compressed, raw.len()).unwrap().as_ref(), &raw[..]);
    }

    #[test]
    fn block_layout() {
        let mut attrs = minimal(Box2i::new(0, 10, 3, 40), Compression::Zip);
        attrs[0] = attr(
            "channels",
            AttributeValue::Channels(smallvec![channel("A", PixelType::Half), channel("Z", PixelType::Float)]),
        );
        let header = PartHeader::from_attributes(attrs, 2).unwrap();

        let block = BlockLayout::for_line(&header, 27);
        assert_eq!(block.first_y(), 26);
        assert_eq!(block.lines(), 26..41);
        assert_eq!(block.byte_size(), 15 * (8 + 16));

        let data: Vec<u8> = (0..block.byte_size()).map(|i| i as u8).collect();
        let z = block.channel_bytes(&data, 27, 1).unwrap();
        assert_eq!(z.len(), 16);
        assert_eq!(z[0], (24 + 8) as u8);
        assert!(block.channel_bytes(&data, 41, 0).is_none());
    }

    #[test]
    fn typed_stores_are_exact() {
        let bits: Vec<u8> = [0x3c01u16, 0x7bff].iter().flat_map(|b| b.to_le_bytes()).collect();
        let line = SampleLine::Le(PixelType::Half, &bits);
        assert_eq!(line.len(), 2);
        let mut halves = [f16::ZERO; 2];
        line.store(0, PlaneRowMut::F16(&mut halves));
        assert_eq!(halves.map(f16::to_bits), [0x3c01, 0x7bff]);

        let ints = [u32::MAX, 16_777_217];
        let mut out = [0u32; 1];
        SampleLine::U32(&ints).store(1, PlaneRowMut::U32(&mut out));
        assert_eq!(out, [16_777_217]);

        let mut floats = [0.0f32; 2];
        SampleLine::F16(&[f16::ONE, f16::from_f32(0.25)]).copy_f32(0, &mut floats);
        assert_eq!(floats, [1.0, 0.25]);
    }

    #[test]
    fn sample_decoding() {
        let mut out = [0.0f32; 2];
        let bytes: Vec<u8> = [half::f16::from_f32(0.5), half::f16::from_f32(-2.0)]
            .iter()
            .flat_map(|h| h.to_le_bytes())
            .collect();
        decode_samples(PixelType::Half, &bytes, &mut out);
        assert_eq!(out, [0.5, -2.0]);
    }
}
