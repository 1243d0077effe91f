//! Bridge to the `exr` codec library.
//!
//! PIZ, PXR24, B44, B44A, DWAA and DWAB chunks and tiled parts are decoded
//! by the library, which parallelises across its rayon workers. Each flat
//! part is decoded once at its largest resolution level and kept as typed
//! sample arrays; the engines then copy lines out of it. Library errors
//! become [`ReadError::CodecFailure`] here and nowhere else.
//!
//! Files mixing deep and flat parts are handed to the library as a copy
//! holding only the flat parts, renumbered in file order.

use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use half::f16;
use tracing::debug;

use super::SampleLine;
use crate::catalogue::Catalogue;
use crate::error::{ReadError, ReadResult};
use crate::header::flags;

/// One channel of a decoded part.
#[derive(Debug, Clone)]
enum Samples {
    F16(Vec<f16>),
    F32(Vec<f32>),
    U32(Vec<u32>),
}

impl Samples {
    fn byte_size(&self) -> usize {
        match self {
            Samples::F16(v) => v.len() * 2,
            Samples::F32(v) => v.len() * 4,
            Samples::U32(v) => v.len() * 4,
        }
    }
}

/// Flat part decoded by the library, addressed in file coordinates.
#[derive(Debug, Clone)]
pub struct DecodedPart {
    min_x: i32,
    min_y: i32,
    width: usize,
    height: usize,
    channels: Vec<(String, Samples)>,
}

impl DecodedPart {
    /// Samples of `channel` on file line `y`, starting at the data window's min-x.
    pub fn line(&self, channel: &str, y: i32) -> Option<SampleLine<'_>> {
        let row = usize::try_from(y.checked_sub(self.min_y)?).ok().filter(|&r| r < self.height)?;
        let range = row * self.width..(row + 1) * self.width;
        let (_, samples) = self.channels.iter().find(|(name, _)| name == channel)?;
        Some(match samples {
            Samples::F16(v) => SampleLine::F16(&v[range]),
            Samples::F32(v) => SampleLine::F32(&v[range]),
            Samples::U32(v) => SampleLine::U32(&v[range]),
        })
    }

    /// Data window min-x.
    pub fn min_x(&self) -> i32 {
        self.min_x
    }

    /// Bytes held.
    pub fn byte_size(&self) -> usize {
        self.channels.iter().map(|(_, s)| s.byte_size()).sum()
    }
}

/// Every flat part of a file, decoded.
#[derive(Debug, Clone, Default)]
pub struct DecodedFile {
    parts: Vec<DecodedPart>,
    /// Header index to position in `parts`, `None` for deep parts.
    ordinals: Vec<Option<usize>>,
}

/// Position of every flat part among the flat parts.
fn flat_ordinals(catalogue: &Catalogue) -> Vec<Option<usize>> {
    let mut next = 0;
    catalogue
        .parts
        .iter()
        .map(|part| {
            (!part.part_type.is_deep()).then(|| {
                next += 1;
                next - 1
            })
        })
        .collect()
}

/// `len` bytes of `bytes` from `start`.
fn span<'a>(bytes: &'a [u8], start: u64, len: u64, what: &str) -> ReadResult<&'a [u8]> {
    usize::try_from(start)
        .ok()
        .zip(usize::try_from(len).ok())
        .and_then(|(start, len)| bytes.get(start..start.checked_add(len)?))
        .ok_or_else(|| ReadError::Truncated(format!("{what} at byte {start}")))
}

/// Copy of `bytes` without its deep parts: flat headers, rebuilt offset
/// tables and the flat chunks with their part numbers rewritten.
fn without_deep_parts(bytes: &[u8], catalogue: &Catalogue) -> ReadResult<Vec<u8>> {
    let flat: Vec<usize> = (0..catalogue.parts.len()).filter(|&p| !catalogue.parts[p].part_type.is_deep()).collect();
    let mut out = span(bytes, 0, 4, "magic number")?.to_vec();
    out.write_u32::<LittleEndian>(catalogue.version & !flags::DEEP)?;
    for &part in &flat {
        let header = catalogue
            .header_spans
            .get(part)
            .ok_or_else(|| ReadError::Malformed(format!("part {part} has no header")))?;
        out.extend_from_slice(span(bytes, header.start, header.end - header.start, "part header")?);
    }
    out.push(0);

    let table_len: usize = flat.iter().map(|&p| catalogue.offsets.get(p).map_or(0, Vec::len)).sum();
    let mut table: Vec<u64> = Vec::with_capacity(table_len);
    let mut chunks: Vec<u8> = Vec::new();
    let mut next = (out.len() + table_len * 8) as u64;
    for (ordinal, &part) in flat.iter().enumerate() {
        let coords: u64 = if catalogue.parts[part].part_type.is_tiled() { 16 } else { 4 };
        for &offset in catalogue.offsets.get(part).map_or(&[][..], Vec::as_slice) {
            let body = offset + 4;
            let size = span(bytes, body + coords, 4, "chunk size")?.read_i32::<LittleEndian>()?;
            let size = u64::try_from(size).map_err(|_| ReadError::Malformed(format!("chunk size {size}")))?;
            let chunk = span(bytes, body, coords + 4 + size, "chunk")?;
            table.push(next);
            chunks.write_i32::<LittleEndian>(ordinal as i32)?;
            chunks.extend_from_slice(chunk);
            next += 4 + chunk.len() as u64;
        }
    }
    for offset in table {
        out.write_u64::<LittleEndian>(offset)?;
    }
    out.extend_from_slice(&chunks);
    Ok(out)
}

impl DecodedFile {
    /// Decodes the flat parts of the file at `path`.
    pub fn from_path(path: &Path, catalogue: &Catalogue) -> ReadResult<Self> {
        if catalogue.has_deep_parts() {
            return Self::from_bytes(&std::fs::read(path)?, catalogue);
        }
        let file = std::fs::File::open(path)?;
        Self::from_reader(BufReader::new(file), flat_ordinals(catalogue))
    }

    /// Decodes the flat parts of a file held in memory.
    pub fn from_bytes(bytes: &[u8], catalogue: &Catalogue) -> ReadResult<Self> {
        let ordinals = flat_ordinals(catalogue);
        if !catalogue.has_deep_parts() {
            return Self::from_reader(Cursor::new(bytes), ordinals);
        }
        if ordinals.iter().all(Option::is_none) {
            return Ok(Self { parts: Vec::new(), ordinals });
        }
        let flat = without_deep_parts(bytes, catalogue)?;
        debug!(from = bytes.len(), to = flat.len(), "dropped deep parts before library decode");
        Self::from_reader(Cursor::new(flat), ordinals)
    }

    fn from_reader(reader: impl Read + Seek + Send, ordinals: Vec<Option<usize>>) -> ReadResult<Self> {
        use exr::prelude::*;

        let image = read()
            .no_deep_data()
            .largest_resolution_level()
            .all_channels()
            .all_layers()
            .all_attributes()
            .from_buffered(reader)
            .map_err(ReadError::codec)?;

        let parts = image
            .layer_data
            .into_iter()
            .map(|layer| {
                let channels = layer
                    .channel_data
                    .list
                    .into_iter()
                    .map(|channel| {
                        let samples = match channel.sample_data {
                            FlatSamples::F16(v) => Samples::F16(v),
                            FlatSamples::F32(v) => Samples::F32(v),
                            FlatSamples::U32(v) => Samples::U32(v),
                        };
                        (channel.name.to_string(), samples)
                    })
                    .collect();
                DecodedPart {
                    min_x: layer.attributes.layer_position.x(),
                    min_y: layer.attributes.layer_position.y(),
                    width: layer.size.width(),
                    height: layer.size.height(),
                    channels,
                }
            })
            .collect::<Vec<_>>();

        debug!(parts = parts.len(), "decoded file through the codec library");
        Ok(Self { parts, ordinals })
    }

    /// Decoded part for header index `index`.
    pub fn part(&self, index: usize) -> ReadResult<&DecodedPart> {
        let Some(ordinal) = self.ordinals.get(index).copied().flatten() else {
            return Err(ReadError::CodecFailure(format!("part {index} is not a flat part")));
        };
        self.parts
            .get(ordinal)
            .ok_or_else(|| ReadError::CodecFailure(format!("codec library returned no part {index}")))
    }

    /// Bytes held across all parts.
    pub fn byte_size(&self) -> usize {
        self.parts.iter().map(DecodedPart::byte_size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_is_a_codec_failure() {
        let err = DecodedFile::from_reader(Cursor::new([0u8; 16]), vec![Some(0)]).unwrap_err();
        assert!(matches!(err, ReadError::CodecFailure(_)));
    }

    #[test]
    fn header_indices_skip_deep_parts() {
        let line = |value| DecodedPart {
            min_x: 0,
            min_y: 0,
            width: 1,
            height: 1,
            channels: vec![("R".into(), Samples::F32(vec![value]))],
        };
        let file = DecodedFile { parts: vec![line(1.0), line(2.0)], ordinals: vec![None, Some(0), None, Some(1)] };
        let Some(SampleLine::F32(values)) = file.part(3).unwrap().line("R", 0) else {
            panic!("expected a float line");
        };
        assert_eq!(values, &[2.0]);
        assert!(matches!(file.part(0), Err(ReadError::CodecFailure(ref m)) if m.contains("not a flat part")));
        assert!(file.part(7).is_err());
    }

    #[test]
    fn lines_are_addressed_in_file_coordinates() {
        let part = DecodedPart {
            min_x: 5,
            min_y: -2,
            width: 2,
            height: 2,
            channels: vec![("R".into(), Samples::F32(vec![1.0, 2.0, 3.0, 4.0]))],
        };
        let Some(SampleLine::F32(line)) = part.line("R", -1) else {
            panic!("expected a float line");
        };
        assert_eq!(line, &[3.0, 4.0]);
        assert!(part.line("R", 0).is_none());
        assert!(part.line("G", -2).is_none());
        assert_eq!(part.byte_size(), 16);
    }
}
