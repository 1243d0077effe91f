//! Deep scanline decoding.

mod common;

use std::io::Cursor;

use common::*;
use exr::prelude::{
    AnyChannel, AnyChannels, Blocks, Compression, Encoding, FlatSamples, Image, ImageAttributes, IntegerBounds, Layer,
    LayerAttributes, LineOrder, WritableImage,
};
use half::f16;
use smallvec::smallvec;
use vfx_core::{Bounds, Channel, ChannelSet, DataType, DeepOutputPlane, ImagePlane, KEY_DEPTH};
use vfx_exr_reader::{EdgeMode, ReaderConfig};

fn count(x: i32, y: i32) -> u32 {
    ((x * 3 + y) % 4) as u32
}

/// Depth grows with the sample index so samples stay ordered.
fn depth(c: usize, x: i32, y: i32, s: u32) -> f32 {
    if c == 1 {
        10.0 * y as f32 + x as f32 + s as f32 * 0.25
    } else {
        0.25
    }
}

fn deep_part(window: [i32; 4], compression: u8) -> Part {
    Part::deep(&[("Z", FLOAT), ("A", HALF)], window, count, depth).compression(compression)
}

fn decode(reader: &vfx_exr_reader::ExrReader, bounds: Bounds, channels: &ChannelSet) -> DeepOutputPlane {
    let mut plane = DeepOutputPlane::new(Bounds::EMPTY, ChannelSet::new());
    assert!(reader.do_deep_engine(bounds, channels, &mut plane));
    plane
}

#[test]
fn sample_counts_match_the_count_table() {
    for compression in [NONE, ZIPS] {
        let (reader, host) = open(write_exr(&[deep_part([0, 0, 5, 3], compression)]), ReaderConfig::default());
        let (bounds, _) = reader.deep_info().expect("deep part");
        assert_eq!(bounds, Bounds::new(0, 0, 6, 4));

        let channels = set(&[Channel::DEEP_FRONT, Channel::ALPHA]);
        let plane = decode(&reader, bounds, &channels);
        let mut expected_total = 0;
        for host_y in 0..4 {
            let file_y = 3 - host_y;
            let line: u32 = (0..6).map(|x| plane.sample_count(host_y, x)).sum();
            let table: u32 = (0..6).map(|x| count(x, file_y)).sum();
            assert_eq!(line, table, "line {file_y}");
            expected_total += table as usize;

            for x in 0..6 {
                for s in 0..count(x, file_y) as usize {
                    assert_eq!(plane.value(host_y, x, s, Channel::DEEP_FRONT), Some(depth(1, x, file_y, s as u32)));
                    assert_eq!(plane.value(host_y, x, s, Channel::ALPHA), Some(0.25));
                }
            }
        }
        assert_eq!(plane.total_samples(), expected_total);
        assert!(plane.sample_capacity() >= expected_total);
        assert!(host.errors().is_empty(), "{:?}", host.errors());
    }
}

#[test]
fn empty_lines_reserve_nothing() {
    let part = Part::deep(&[("Z", FLOAT)], [0, 0, 3, 1], |_, y| if y == 0 { 0 } else { 1 }, |_, _, _, _| 1.0);
    let (reader, _) = open(write_exr(&[part]), ReaderConfig::default());
    let channels = set(&[Channel::DEEP_FRONT]);

    // host row 1 is file line 0, which has no samples
    let plane = decode(&reader, Bounds::new(0, 1, 4, 2), &channels);
    assert!((0..4).all(|x| plane.sample_count(1, x) == 0));
    assert_eq!(plane.total_samples(), 0);
    assert!(plane.is_complete());

    let plane = decode(&reader, Bounds::new(0, 0, 4, 2), &channels);
    assert_eq!(plane.total_samples(), 4);
}

#[test]
fn back_depth_falls_back_to_front_depth() {
    let (reader, _) = open(write_exr(&[deep_part([0, 0, 2, 0], NONE)]), ReaderConfig::default());
    let (bounds, available) = reader.deep_info().unwrap();
    assert!(available.contains(Channel::DEEP_BACK));

    let channels = set(&[Channel::DEEP_FRONT, Channel::DEEP_BACK]);
    let plane = decode(&reader, bounds, &channels);
    for x in 0..3 {
        for s in 0..plane.sample_count(0, x) as usize {
            assert_eq!(plane.value(0, x, s, Channel::DEEP_BACK), plane.value(0, x, s, Channel::DEEP_FRONT));
        }
    }
}

#[test]
fn ring_around_the_data_window_has_no_samples() {
    let part = deep_part([1, 1, 3, 2], ZIPS).display([0, 0, 4, 3]);
    let (reader, _) = open(write_exr(&[part]), ReaderConfig::default().with_edge_mode(EdgeMode::Black));
    let (bounds, _) = reader.deep_info().unwrap();
    assert_eq!(bounds, Bounds::new(0, 0, 5, 4));
    // two chunks in the file, plus the rows added above and below
    assert_eq!(reader.info().metadata.get_int("exr/chunkCount"), Some(4));

    let plane = decode(&reader, bounds, &set(&[Channel::DEEP_FRONT]));
    for x in 0..5 {
        assert_eq!(plane.sample_count(0, x), 0);
        assert_eq!(plane.sample_count(3, x), 0);
    }
    assert_eq!(plane.sample_count(1, 0), 0);
    // host row 1 is file line 2
    assert_eq!(plane.sample_count(1, 2), count(2, 2));
}

#[test]
fn repeat_edges_keep_the_data_window() {
    let part = deep_part([1, 1, 3, 2], ZIPS).display([0, 0, 4, 3]);
    let (reader, _) = open(write_exr(&[part]), ReaderConfig::default().with_edge_mode(EdgeMode::Repeat));
    let (bounds, _) = reader.deep_info().unwrap();
    assert_eq!(bounds, Bounds::new(1, 1, 4, 3));
    assert_eq!(reader.info().metadata.get_int("exr/chunkCount"), Some(2));
}

#[test]
fn depth_label_ignores_depth_channels() {
    let (reader, _) = open(write_exr(&[deep_part([0, 0, 1, 0], NONE)]), ReaderConfig::default());
    assert_eq!(reader.info().metadata.get_text(KEY_DEPTH), Some("half"));
}

#[test]
fn flat_files_have_no_deep_data() {
    let part = Part::flat(&[("R", HALF)], [0, 0, 1, 0], |_, _, _| 1.0);
    let (reader, host) = open(write_exr(&[part]), ReaderConfig::default());
    assert!(reader.deep_info().is_none());

    let mut plane = DeepOutputPlane::new(Bounds::EMPTY, ChannelSet::new());
    assert!(!reader.do_deep_engine(Bounds::new(0, 0, 2, 1), &set(&[Channel::DEEP_FRONT]), &mut plane));
    assert_eq!(host.errors().len(), 1);
    assert!(host.errors()[0].contains("no deep data"));
}

#[test]
fn mixed_flat_and_deep_parts() {
    let flat = Part::flat(&[("R", HALF)], [0, 0, 2, 0], |_, x, _| x as f32).named("rgba");
    let deep = deep_part([0, 0, 2, 0], ZIPS).named("deep");
    let (reader, host) = open(write_exr(&[flat, deep]), ReaderConfig::default());
    assert!(reader.is_open(), "{:?}", reader.open_error());

    let row = row(&reader, 0, 0, 3, &set(&[Channel::RED]));
    assert_eq!(row.get(Channel::RED).unwrap(), &[0.0, 1.0, 2.0]);

    let (bounds, _) = reader.deep_info().expect("deep part");
    let plane = decode(&reader, bounds, &set(&[Channel::DEEP_FRONT]));
    assert_eq!(plane.sample_count(0, 1), count(1, 0));
    assert!(host.errors().is_empty(), "{:?}", host.errors());
}

/// PIZ chunks of a 3x1 half `R` image holding `x / 2`, as the exr crate
/// writes them.
fn piz_red_chunks() -> Vec<Vec<u8>> {
    let red = (0..3).map(|x| f16::from_f32(x as f32 * 0.5)).collect();
    let layer = Layer::new(
        (3, 1),
        LayerAttributes::default(),
        Encoding { compression: Compression::PIZ, blocks: Blocks::ScanLines, line_order: LineOrder::Increasing },
        AnyChannels::sort(smallvec![AnyChannel::new("R", FlatSamples::F16(red))]),
    );
    let image = Image::from_layers(ImageAttributes::new(IntegerBounds::from_dimensions((3, 1))), smallvec![layer]);
    let mut bytes = Vec::new();
    image.write().to_buffered(Cursor::new(&mut bytes)).unwrap();
    chunk_payloads(&bytes, 1)
}

#[test]
fn library_coded_part_after_a_deep_part() {
    let deep = deep_part([0, 0, 2, 0], ZIPS).named("deep");
    let flat = Part::raw(&[("R", HALF)], [0, 0, 2, 0], PIZ, piz_red_chunks()).named("rgba");
    let bytes = write_exr(&[deep, flat]);
    let red = set(&[Channel::RED]);

    let (reader, host) = open(bytes.clone(), ReaderConfig::default());
    assert!(reader.is_open(), "{:?}", reader.open_error());
    let row = row(&reader, 0, 0, 3, &red);
    assert_eq!(row.get(Channel::RED).unwrap(), &[0.0, 0.5, 1.0]);
    let (bounds, _) = reader.deep_info().expect("deep part");
    let plane = decode(&reader, bounds, &set(&[Channel::DEEP_FRONT]));
    assert_eq!(plane.sample_count(0, 2), count(2, 0));
    assert!(host.errors().is_empty(), "{:?}", host.errors());

    let (reader, host) = open(bytes, ReaderConfig::default());
    let mut plane = ImagePlane::new(reader.info().bbox, red.clone(), DataType::F32);
    assert!(reader.fetch_plane(&mut plane, &red), "{:?}", host.errors());
    assert_eq!(plane.sample(Channel::RED, 1, 0), Some(0.5));
    assert_eq!(plane.sample(Channel::RED, 2, 0), Some(1.0));
}

#[test]
fn abort_leaves_the_deep_plane_partial() {
    let (reader, host) = open(write_exr(&[deep_part([0, 0, 5, 3], ZIPS)]), ReaderConfig::default());
    host.abort_flag().raise();
    let mut plane = DeepOutputPlane::new(Bounds::EMPTY, ChannelSet::new());
    assert!(!reader.do_deep_engine(Bounds::new(0, 0, 6, 4), &set(&[Channel::DEEP_FRONT]), &mut plane));
    assert!(!plane.is_complete());
    assert!(host.errors().is_empty());
}
