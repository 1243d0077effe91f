//! Shared helpers: a byte-level OpenEXR writer for the natively decoded
//! codecs, plus hosts and requests used across the integration tests.

#![allow(dead_code)]

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use half::f16;
use miniz_oxide::deflate::compress_to_vec_zlib;
use vfx_core::{Channel, ChannelSet, ChannelTable, RecordingHost, Row};
use vfx_exr_reader::{ExrReader, ReaderConfig};

pub const NONE: u8 = 0;
pub const ZIPS: u8 = 2;
pub const ZIP: u8 = 3;
pub const PIZ: u8 = 4;

pub const UINT: i32 = 0;
pub const HALF: i32 = 1;
pub const FLOAT: i32 = 2;

const MAGIC: u32 = 20000630;
const MULTIPART: u32 = 0x1000;
const DEEP: u32 = 0x800;

/// Flat pixel source: channel index, file x, file y.
pub type FlatFn = Box<dyn Fn(usize, i32, i32) -> f32>;
/// Deep sample count: file x, file y.
pub type CountFn = Box<dyn Fn(i32, i32) -> u32>;
/// Deep sample value: channel index, file x, file y, sample.
pub type SampleFn = Box<dyn Fn(usize, i32, i32, u32) -> f32>;

pub enum Pixels {
    Flat(FlatFn),
    Deep { counts: CountFn, value: SampleFn },
    /// Chunks encoded elsewhere: y, size and data, without a part number.
    Raw(Vec<Vec<u8>>),
}

/// One part of a file under construction.
pub struct Part {
    pub name: Option<String>,
    pub view: Option<String>,
    pub compression: u8,
    /// Sorted by name, as a writer would store them.
    pub channels: Vec<(String, i32)>,
    pub data_window: [i32; 4],
    pub display_window: [i32; 4],
    pub extra: Vec<(String, String, Vec<u8>)>,
    pub pixels: Pixels,
}

impl Part {
    pub fn flat(channels: &[(&str, i32)], window: [i32; 4], pixels: impl Fn(usize, i32, i32) -> f32 + 'static) -> Self {
        let mut channels: Vec<(String, i32)> = channels.iter().map(|(n, t)| (n.to_string(), *t)).collect();
        channels.sort();
        Self {
            name: None,
            view: None,
            compression: NONE,
            channels,
            data_window: window,
            display_window: window,
            extra: Vec::new(),
            pixels: Pixels::Flat(Box::new(pixels)),
        }
    }

    pub fn deep(
        channels: &[(&str, i32)],
        window: [i32; 4],
        counts: impl Fn(i32, i32) -> u32 + 'static,
        value: impl Fn(usize, i32, i32, u32) -> f32 + 'static,
    ) -> Self {
        let mut part = Self::flat(channels, window, |_, _, _| 0.0);
        part.pixels = Pixels::Deep { counts: Box::new(counts), value: Box::new(value) };
        part
    }

    /// Flat part whose chunks were encoded by another writer.
    pub fn raw(channels: &[(&str, i32)], window: [i32; 4], compression: u8, chunks: Vec<Vec<u8>>) -> Self {
        let mut part = Self::flat(channels, window, |_, _, _| 0.0).compression(compression);
        part.pixels = Pixels::Raw(chunks);
        part
    }

    pub fn compression(mut self, code: u8) -> Self {
        self.compression = code;
        self
    }

    pub fn display(mut self, window: [i32; 4]) -> Self {
        self.display_window = window;
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn view(mut self, view: &str) -> Self {
        self.view = Some(view.to_string());
        self
    }

    pub fn attribute(mut self, name: &str, kind: &str, value: Vec<u8>) -> Self {
        self.extra.push((name.to_string(), kind.to_string(), value));
        self
    }

    /// Index of `name` in the sorted channel list.
    pub fn channel_index(&self, name: &str) -> usize {
        self.channels.iter().position(|(n, _)| n == name).expect("channel in part")
    }

    fn is_deep(&self) -> bool {
        matches!(self.pixels, Pixels::Deep { .. })
    }

    fn lines_per_chunk(&self) -> i32 {
        if self.compression == ZIP && !self.is_deep() {
            16
        } else {
            1
        }
    }

    fn chunk_count(&self) -> usize {
        if let Pixels::Raw(chunks) = &self.pixels {
            return chunks.len();
        }
        let height = self.data_window[3] - self.data_window[1] + 1;
        let lines = self.lines_per_chunk();
        ((height + lines - 1) / lines) as usize
    }
}

pub fn string_value(text: &str) -> Vec<u8> {
    text.as_bytes().to_vec()
}

pub fn int_value(value: i32) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

pub fn float_value(value: f32) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

pub fn string_vector(items: &[&str]) -> Vec<u8> {
    let mut out = Vec::new();
    for item in items {
        out.extend_from_slice(&(item.len() as i32).to_le_bytes());
        out.extend_from_slice(item.as_bytes());
    }
    out
}

fn box_value(window: [i32; 4]) -> Vec<u8> {
    window.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn channel_list(channels: &[(String, i32)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, pixel_type) in channels {
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        out.extend_from_slice(&pixel_type.to_le_bytes());
        out.extend_from_slice(&[0, 0, 0, 0]);
        out.extend_from_slice(&1i32.to_le_bytes());
        out.extend_from_slice(&1i32.to_le_bytes());
    }
    out.push(0);
    out
}

fn attribute(out: &mut Vec<u8>, name: &str, kind: &str, value: &[u8]) {
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    out.extend_from_slice(kind.as_bytes());
    out.push(0);
    out.extend_from_slice(&(value.len() as i32).to_le_bytes());
    out.extend_from_slice(value);
}

fn sample_bytes(pixel_type: i32, value: f32) -> Vec<u8> {
    match pixel_type {
        UINT => (value as u32).to_le_bytes().to_vec(),
        HALF => f16::from_f32(value).to_le_bytes().to_vec(),
        _ => value.to_le_bytes().to_vec(),
    }
}

/// ZIP-family encoding: split even/odd bytes, delta, zlib. Falls back to
/// raw bytes when compression does not pay.
pub fn zip(raw: &[u8]) -> Vec<u8> {
    if raw.is_empty() {
        return Vec::new();
    }
    let mut split: Vec<u8> = raw.iter().step_by(2).copied().collect();
    split.extend(raw.iter().skip(1).step_by(2));
    let mut deltas = Vec::with_capacity(split.len());
    deltas.push(split[0]);
    for pair in split.windows(2) {
        deltas.push(pair[1].wrapping_sub(pair[0]).wrapping_add(128));
    }
    let packed = compress_to_vec_zlib(&deltas, 6);
    if packed.len() >= raw.len() {
        raw.to_vec()
    } else {
        packed
    }
}

fn compress(code: u8, raw: Vec<u8>) -> Vec<u8> {
    match code {
        ZIPS | ZIP => zip(&raw),
        _ => raw,
    }
}

fn header(part: &Part, multipart: bool) -> Vec<u8> {
    let mut out = Vec::new();
    attribute(&mut out, "channels", "chlist", &channel_list(&part.channels));
    attribute(&mut out, "compression", "compression", &[part.compression]);
    attribute(&mut out, "dataWindow", "box2i", &box_value(part.data_window));
    attribute(&mut out, "displayWindow", "box2i", &box_value(part.display_window));
    attribute(&mut out, "lineOrder", "lineOrder", &[0]);
    attribute(&mut out, "pixelAspectRatio", "float", &float_value(1.0));
    attribute(&mut out, "screenWindowCenter", "v2f", &[0; 8]);
    attribute(&mut out, "screenWindowWidth", "float", &float_value(1.0));
    if let Some(name) = &part.name {
        attribute(&mut out, "name", "string", name.as_bytes());
    }
    if let Some(view) = &part.view {
        attribute(&mut out, "view", "string", view.as_bytes());
    }
    if multipart || part.is_deep() {
        let kind = if part.is_deep() { "deepscanline" } else { "scanlineimage" };
        attribute(&mut out, "type", "string", kind.as_bytes());
        attribute(&mut out, "chunkCount", "int", &int_value(part.chunk_count() as i32));
    }
    if part.is_deep() {
        attribute(&mut out, "version", "int", &int_value(1));
    }
    for (name, kind, value) in &part.extra {
        attribute(&mut out, name, kind, value);
    }
    out.push(0);
    out
}

/// Chunk payloads (everything after the part number) of one part.
fn chunks(part: &Part) -> Vec<Vec<u8>> {
    if let Pixels::Raw(chunks) = &part.pixels {
        return chunks.clone();
    }
    let [min_x, min_y, max_x, max_y] = part.data_window;
    let lines = part.lines_per_chunk();
    let mut out = Vec::new();
    let mut y = min_y;
    while y <= max_y {
        let last = (y + lines - 1).min(max_y);
        let mut chunk = y.to_le_bytes().to_vec();
        match &part.pixels {
            Pixels::Flat(pixel) => {
                let mut raw = Vec::new();
                for line in y..=last {
                    for (c, (_, pixel_type)) in part.channels.iter().enumerate() {
                        for x in min_x..=max_x {
                            raw.extend(sample_bytes(*pixel_type, pixel(c, x, line)));
                        }
                    }
                }
                let data = compress(part.compression, raw);
                chunk.extend_from_slice(&(data.len() as i32).to_le_bytes());
                chunk.extend(data);
            }
            Pixels::Deep { counts, value } => {
                let mut table = Vec::new();
                let mut total = 0u32;
                for x in min_x..=max_x {
                    total += counts(x, y);
                    table.extend_from_slice(&(total as i32).to_le_bytes());
                }
                let mut samples = Vec::new();
                for (c, (_, pixel_type)) in part.channels.iter().enumerate() {
                    for x in min_x..=max_x {
                        for s in 0..counts(x, y) {
                            samples.extend(sample_bytes(*pixel_type, value(c, x, y, s)));
                        }
                    }
                }
                let unpacked = samples.len() as u64;
                let table = compress(part.compression, table);
                let samples = compress(part.compression, samples);
                chunk.extend_from_slice(&(table.len() as u64).to_le_bytes());
                chunk.extend_from_slice(&(samples.len() as u64).to_le_bytes());
                chunk.extend_from_slice(&unpacked.to_le_bytes());
                chunk.extend(table);
                chunk.extend(samples);
            }
            Pixels::Raw(_) => unreachable!("raw chunks are returned whole"),
        }
        out.push(chunk);
        y = last + 1;
    }
    out
}

/// Serialises `parts` as a complete file.
pub fn write_exr(parts: &[Part]) -> Vec<u8> {
    let multipart = parts.len() > 1;
    let mut version = 2u32;
    if multipart {
        version |= MULTIPART;
    } else if parts.iter().any(Part::is_deep) {
        version |= DEEP;
    }

    let mut out = MAGIC.to_le_bytes().to_vec();
    out.extend_from_slice(&version.to_le_bytes());
    for part in parts {
        out.extend(header(part, multipart));
    }
    if multipart {
        out.push(0);
    }

    let payloads: Vec<Vec<Vec<u8>>> = parts.iter().map(chunks).collect();
    let table_bytes: usize = payloads.iter().map(|p| p.len() * 8).sum();
    let mut offset = (out.len() + table_bytes) as u64;
    let mut tables = Vec::new();
    let mut body = Vec::new();
    for (index, part_chunks) in payloads.iter().enumerate() {
        for chunk in part_chunks {
            tables.extend_from_slice(&offset.to_le_bytes());
            if multipart {
                body.extend_from_slice(&(index as i32).to_le_bytes());
                offset += 4;
            }
            body.extend_from_slice(chunk);
            offset += chunk.len() as u64;
        }
    }
    out.extend(tables);
    out.extend(body);
    out
}

fn le_i32(bytes: &[u8], at: usize) -> i32 {
    i32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
}

/// Chunk offsets of a single-part file, read past its header.
pub fn offset_table(bytes: &[u8], chunks: usize) -> Vec<usize> {
    let mut at = 8;
    while bytes[at] != 0 {
        // attribute name and type, then the sized value
        for _ in 0..2 {
            at += bytes[at..].iter().position(|&b| b == 0).unwrap() + 1;
        }
        at += 4 + le_i32(bytes, at) as usize;
    }
    at += 1;
    (0..chunks)
        .map(|i| u64::from_le_bytes(bytes[at + i * 8..at + i * 8 + 8].try_into().unwrap()) as usize)
        .collect()
}

/// Scanline chunks (y, size and data) of a single-part file.
pub fn chunk_payloads(bytes: &[u8], chunks: usize) -> Vec<Vec<u8>> {
    offset_table(bytes, chunks)
        .into_iter()
        .map(|offset| bytes[offset..offset + 8 + le_i32(bytes, offset + 4) as usize].to_vec())
        .collect()
}

/// Writes `bytes` to a fresh temporary file.
pub fn temp_exr(bytes: &[u8]) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("test.exr");
    let mut file = std::fs::File::create(&path).expect("create");
    file.write_all(bytes).expect("write");
    (dir, path)
}

pub fn open(bytes: Vec<u8>, config: ReaderConfig) -> (ExrReader, Arc<RecordingHost>) {
    let registry = ChannelTable::new();
    let host = Arc::new(RecordingHost::with_threads(4));
    let reader = ExrReader::from_bytes(bytes, config, &registry, host.clone());
    (reader, host)
}

pub fn set(channels: &[Channel]) -> ChannelSet {
    channels.iter().copied().collect()
}

/// Decodes host row `y` over `[x, r)`.
pub fn row(reader: &ExrReader, y: i32, x: i32, r: i32, channels: &ChannelSet) -> Row {
    let mut row = Row::new(x, r, channels);
    assert!(reader.engine(y, x, r, channels, &mut row), "engine failed on row {y}");
    row
}

/// A gradient that differs per channel, pixel and line.
pub fn gradient(c: usize, x: i32, y: i32) -> f32 {
    (c as f32 + 1.0) * 0.125 + x as f32 * 0.01 + y as f32 * 0.5
}
