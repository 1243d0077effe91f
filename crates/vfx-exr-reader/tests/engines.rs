//! Properties shared by the row and plane engines.

mod common;

use std::sync::Arc;
use std::thread;

use common::*;
use half::f16;
use vfx_core::{Bounds, Channel, ChannelSet, ChannelTable, DataType, ImagePlane, RecordingHost, Row};
use vfx_exr_reader::{EdgeMode, ExrReader, FileReadMode, ReaderConfig, Srgb};

const WIDTH: i32 = 37;
const HEIGHT: i32 = 40;

fn rgba_part(compression: u8, pixel_type: i32) -> Part {
    let channels = [("R", pixel_type), ("G", pixel_type), ("B", pixel_type), ("A", pixel_type)];
    Part::flat(&channels, [0, 0, WIDTH - 1, HEIGHT - 1], gradient).compression(compression)
}

/// File value of channel index `c` at `(x, y)` after a half round trip.
fn stored_half(c: usize, x: i32, y: i32) -> f32 {
    f16::from_f32(gradient(c, x, y)).to_f32()
}

fn all_rows(reader: &ExrReader, channels: &ChannelSet) -> Vec<Row> {
    let bbox = reader.info().bbox;
    (bbox.y..bbox.t).map(|y| row(reader, y, bbox.x, bbox.r, channels)).collect()
}

#[test]
fn rows_hold_the_stored_values_for_every_native_codec() {
    for compression in [NONE, ZIPS, ZIP] {
        let (reader, host) = open(write_exr(&[rgba_part(compression, HALF)]), ReaderConfig::default());
        let rgba = ChannelSet::rgba();
        for (host_y, row) in all_rows(&reader, &rgba).iter().enumerate() {
            let file_y = HEIGHT - 1 - host_y as i32;
            // sorted: A, B, G, R
            for (c, channel) in [Channel::ALPHA, Channel::BLUE, Channel::GREEN, Channel::RED].into_iter().enumerate() {
                let values = row.get(channel).unwrap();
                for x in 0..WIDTH {
                    assert_eq!(values[x as usize], stored_half(c, x, file_y), "compression {compression} x {x}");
                }
            }
        }
        assert!(host.errors().is_empty(), "{:?}", host.errors());
    }
}

#[test]
fn engine_is_idempotent() {
    let (reader, _) = open(write_exr(&[rgba_part(ZIP, FLOAT)]), ReaderConfig::default());
    let rgba = ChannelSet::rgba();
    // rows from different blocks first, so the block cache is cold again
    let first: Vec<Row> = [3, 30, 3].iter().map(|&y| row(&reader, y, 0, WIDTH, &rgba)).collect();
    assert_eq!(first[0], first[2]);

    let mut partial = Row::new(0, WIDTH, &rgba);
    assert!(reader.engine(3, 5, 9, &rgba, &mut partial));
    assert_eq!(partial.get(Channel::RED).unwrap()[5..9], first[0].get(Channel::RED).unwrap()[5..9]);
}

#[test]
fn plane_matches_rows() {
    for (compression, pixel_type, data_type) in [(ZIP, HALF, DataType::F16), (ZIPS, FLOAT, DataType::F32)] {
        let (reader, host) = open(write_exr(&[rgba_part(compression, pixel_type)]), ReaderConfig::default());
        let rgba = ChannelSet::rgba();
        assert_eq!(reader.plane_type(&rgba), data_type);

        let mut plane = ImagePlane::new(reader.info().bbox, rgba.clone(), data_type);
        assert!(reader.fetch_plane(&mut plane, &rgba), "{:?}", host.errors());

        let rows = all_rows(&reader, &rgba);
        for (y, row) in rows.iter().enumerate() {
            for channel in rgba.iter() {
                for (x, &value) in row.get(channel).unwrap().iter().enumerate() {
                    assert_eq!(plane.sample(channel, x as i32, y as i32), Some(value as f64));
                }
            }
        }
    }
}

#[test]
fn plane_larger_than_the_data_window_is_cleared_around_it() {
    let part = Part::flat(&[("R", FLOAT)], [2, 2, 5, 5], |_, _, _| 3.0).display([0, 0, 7, 7]);
    let (reader, _) = open(write_exr(&[part]), ReaderConfig::default().with_edge_mode(EdgeMode::Black));
    let rgba = ChannelSet::rgba();
    let mut plane = ImagePlane::new(Bounds::new(0, 0, 8, 8), rgba.clone(), DataType::F32);
    plane.fill_channel(Channel::RED, 9.0);
    assert!(reader.fetch_plane(&mut plane, &rgba));

    assert_eq!(plane.sample(Channel::RED, 0, 0), Some(0.0));
    assert_eq!(plane.sample(Channel::RED, 3, 3), Some(3.0));
    assert_eq!(plane.sample(Channel::RED, 6, 6), Some(0.0));
    // alpha is filled over the data only
    assert_eq!(plane.sample(Channel::ALPHA, 3, 3), Some(1.0));
    assert_eq!(plane.sample(Channel::ALPHA, 0, 0), Some(0.0));
}

#[test]
fn threads_partitioning_rows_match_a_single_thread() {
    let (reader, host) = open(write_exr(&[rgba_part(ZIP, HALF)]), ReaderConfig::default());
    let rgba = ChannelSet::rgba();
    let expected = all_rows(&reader, &rgba);

    let threads = 4;
    let mut decoded: Vec<(i32, Row)> = thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let (reader, rgba) = (&reader, &rgba);
                scope.spawn(move || {
                    (0..HEIGHT)
                        .filter(|y| y % threads == t)
                        .map(|y| (y, row(reader, y, 0, WIDTH, rgba)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
    });
    decoded.sort_by_key(|(y, _)| *y);

    let rows: Vec<Row> = decoded.into_iter().map(|(_, row)| row).collect();
    assert_eq!(rows, expected);
    assert!(host.errors().is_empty());
}

#[test]
fn negative_display_window_is_shifted_or_cropped() {
    let k = 2;
    let width = 8;
    let part = Part::flat(&[("R", FLOAT)], [-k, 0, width - 1 - k, 1], |_, x, _| x as f32).display([-k, 0, width - 1 - k, 1]);
    let bytes = write_exr(&[part]);
    let red = ChannelSet::rgba();

    let (shifted, _) = open(bytes.clone(), ReaderConfig::default());
    assert_eq!(shifted.info().format.width(), width as i64);
    let row = row(&shifted, 0, 0, width, &red);
    assert_eq!(row.get(Channel::RED).unwrap()[0], -k as f32);
    assert_eq!(row.get(Channel::RED).unwrap()[width as usize - 1], (width - 1 - k) as f32);

    let (cropped, _) = open(bytes, ReaderConfig::default().with_offset_negative_display_window(false));
    assert_eq!(cropped.info().format.width(), (width - 2 * k) as i64);
    let row = common::row(&cropped, 0, 0, width - 2 * k, &red);
    assert_eq!(row.get(Channel::RED).unwrap()[0], 0.0);
    assert_eq!(row.get(Channel::RED).unwrap()[3], 3.0);
}

#[test]
fn planar_falls_back_to_rows_for_shifted_files_and_curves() {
    let part = Part::flat(&[("R", FLOAT)], [-1, 0, 2, 1], |_, x, _| x as f32 + 0.5).display([-1, 0, 2, 1]);
    let (reader, _) = open(write_exr(&[part]), ReaderConfig::default());
    let red = ChannelSet::rgba();
    let mut plane = ImagePlane::new(reader.info().bbox, red.clone(), DataType::F32);
    assert!(reader.fetch_plane(&mut plane, &red));
    assert_eq!(plane.sample(Channel::RED, 0, 0), Some(-0.5));
    assert_eq!(plane.sample(Channel::RED, 3, 1), Some(2.5));

    let part = Part::flat(&[("R", FLOAT)], [0, 0, 1, 0], |_, _, _| 0.5);
    let (mut reader, _) = open(write_exr(&[part]), ReaderConfig::default());
    reader.set_colour_curve(Arc::new(Srgb));
    let mut plane = ImagePlane::new(Bounds::new(0, 0, 2, 1), red.clone(), DataType::F32);
    assert!(reader.fetch_plane(&mut plane, &red));
    let linear = plane.sample(Channel::RED, 0, 0).unwrap();
    assert!(linear > 0.2 && linear < 0.22, "sRGB 0.5 decodes to {linear}");
}

#[test]
fn reclaim_releases_scratch_and_buffers() {
    let bytes = write_exr(&[rgba_part(ZIPS, HALF)]);
    let (_dir, path) = temp_exr(&bytes);
    let registry = ChannelTable::new();
    let host = Arc::new(RecordingHost::with_threads(2));
    let config = ReaderConfig::default().with_file_read_mode(FileReadMode::Buffer);
    let reader = ExrReader::open(&path, config, &registry, host.clone());
    assert!(reader.is_open(), "{:?}", reader.open_error());

    let rgba = ChannelSet::rgba();
    let before = all_rows(&reader, &rgba);
    assert!(host.registered_memory() > 0);

    assert!(reader.reclaim() > 0);
    assert_eq!(host.registered_memory(), 0);

    // decoding after a reclaim reads from the file again
    assert_eq!(all_rows(&reader, &rgba), before);
}

#[test]
fn truncated_chunks_are_reported_not_panicked() {
    let mut bytes = write_exr(&[rgba_part(ZIPS, HALF)]);
    bytes.truncate(bytes.len() - 100);
    let (reader, host) = open(bytes, ReaderConfig::default());
    // the offset table points past the end, so the last chunks cannot be found
    if reader.is_open() {
        let rgba = ChannelSet::rgba();
        let mut row = Row::new(0, WIDTH, &rgba);
        assert!(!reader.engine(0, 0, WIDTH, &rgba, &mut row));
        assert_eq!(host.errors().len(), 1);
    } else {
        assert!(reader.open_error().is_some_and(|e| !e.is_abort()));
        assert_eq!(host.errors().len(), 1);
    }
}

#[test]
fn missing_channels_read_as_zero() {
    let part = Part::flat(&[("Y", HALF)], [0, 0, 3, 0], |_, _, _| 0.5);
    let (reader, _) = open(write_exr(&[part]), ReaderConfig::default());
    let channels = set(&[Channel::RED, Channel::GREEN, Channel::BLUE, Channel::Z]);
    let row = row(&reader, 0, 0, 4, &channels);
    // luminance feeds all three colour channels
    for channel in [Channel::RED, Channel::GREEN, Channel::BLUE] {
        assert_eq!(row.get(channel).unwrap(), &[0.5; 4]);
    }
    assert_eq!(row.get(Channel::Z).unwrap(), &[0.0; 4]);
}

/// 64x2 ZIPS float file with file line 0 at 5.0 and line 1 at 9.0, the
/// chunk of line 0 overwritten with garbage.
fn corrupt_first_line() -> Vec<u8> {
    let part = Part::flat(&[("R", FLOAT)], [0, 0, 63, 1], |_, _, y| if y == 0 { 5.0 } else { 9.0 }).compression(ZIPS);
    let mut bytes = write_exr(&[part]);
    let offset = offset_table(&bytes, 2)[0];
    let size = i32::from_le_bytes(bytes[offset + 4..offset + 8].try_into().unwrap()) as usize;
    bytes[offset + 8..offset + 8 + size].fill(0xff);
    bytes
}

#[test]
fn failed_row_does_not_keep_earlier_pixels() {
    let (reader, host) = open(corrupt_first_line(), ReaderConfig::default());
    let red = set(&[Channel::RED]);
    let mut row = Row::new(0, 64, &red);

    // host row 0 is file line 1
    assert!(reader.engine(0, 0, 64, &red, &mut row));
    assert_eq!(row.get(Channel::RED).unwrap(), &[9.0; 64]);

    assert!(!reader.engine(1, 0, 64, &red, &mut row));
    assert_eq!(row.get(Channel::RED).unwrap(), &[0.0; 64]);
    assert_eq!(host.errors().len(), 1);
}

#[test]
fn failed_plane_is_cleared() {
    let (reader, host) = open(corrupt_first_line(), ReaderConfig::default());
    let red = set(&[Channel::RED]);
    let mut plane = ImagePlane::new(reader.info().bbox, red.clone(), DataType::F32);
    plane.fill_channel(Channel::RED, 7.0);

    assert!(!reader.fetch_plane(&mut plane, &red));
    for (x, y) in [(0, 0), (63, 0), (0, 1), (31, 1)] {
        assert_eq!(plane.sample(Channel::RED, x, y), Some(0.0), "({x}, {y})");
    }
    assert_eq!(host.errors().len(), 1);
}
