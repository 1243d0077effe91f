//! Whole-image decode through the planar engine, with per-channel stats.

use std::time::Instant;

use anyhow::{Result, bail};
use tracing::info;
use vfx_core::ImagePlane;

use super::{Session, format_size};
use crate::PlaneArgs;

#[derive(Debug, Clone, Copy)]
struct Stats {
    min: f64,
    max: f64,
    sum: f64,
    count: usize,
}

impl Stats {
    fn new() -> Self {
        Self { min: f64::INFINITY, max: f64::NEG_INFINITY, sum: 0.0, count: 0 }
    }

    fn add(&mut self, v: f64) {
        self.min = self.min.min(v);
        self.max = self.max.max(v);
        self.sum += v;
        self.count += 1;
    }

    fn mean(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.sum / self.count as f64 }
    }
}

/// Runs the plane command.
pub fn run(session: &Session, args: PlaneArgs) -> Result<()> {
    let reader = session.open(&args.input)?;
    let channels = match &args.channels {
        Some(list) => session.channels(list)?,
        None => reader.info().channels.clone(),
    };
    if channels.is_empty() {
        bail!("{} has no flat channels", args.input.display());
    }

    let bbox = reader.info().bbox;
    let mut plane = ImagePlane::new(bbox, channels.clone(), reader.plane_type(&channels));
    let start = Instant::now();
    let ok = reader.fetch_plane(&mut plane, &channels);
    info!(elapsed = ?start.elapsed(), ok, "plane decoded");
    session.finish("plane")?;
    if !ok {
        bail!("plane was not decoded");
    }

    println!(
        "{}x{} {:?} ({})",
        bbox.width(),
        bbox.height(),
        plane.data_type(),
        format_size(plane.byte_size() as u64)
    );
    for channel in channels.iter() {
        let mut stats = Stats::new();
        for y in bbox.y..bbox.t {
            for x in bbox.x..bbox.r {
                if let Some(v) = plane.sample(channel, x, y) {
                    stats.add(v);
                }
            }
        }
        println!(
            "  {:<16} min {:>10.4}  max {:>10.4}  mean {:>10.4}",
            session.channel_name(channel),
            stats.min,
            stats.max,
            stats.mean()
        );
    }

    if args.reclaim {
        let held = session.host.memory();
        let freed = reader.reclaim();
        println!("reclaimed {} of {} held", format_size(freed as u64), format_size(held as u64));
    }
    Ok(())
}
