//! Deep decode summary.

use anyhow::{Result, bail};
use vfx_core::{Bounds, ChannelSet, DeepOutputPlane};

use super::Session;
use crate::DeepArgs;

/// Runs the deep command.
pub fn run(session: &Session, args: DeepArgs) -> Result<()> {
    let reader = session.open(&args.input)?;
    let Some((bounds, available)) = reader.deep_info() else {
        bail!("{} has no deep data", args.input.display());
    };
    let channels = match &args.channels {
        Some(list) => session.channels(list)?,
        None => available.clone(),
    };

    let mut plane = DeepOutputPlane::new(Bounds::EMPTY, ChannelSet::new());
    if !reader.do_deep_engine(bounds, &channels, &mut plane) {
        session.finish("deep")?;
        bail!("deep plane was not decoded");
    }

    let mut max = 0;
    let mut empty = 0usize;
    for y in bounds.y..bounds.t {
        for x in bounds.x..bounds.r {
            let count = plane.sample_count(y, x);
            max = max.max(count);
            if count == 0 {
                empty += 1;
            }
        }
    }
    let total = plane.total_samples();
    println!("bounds ({}, {}) - ({}, {})", bounds.x, bounds.y, bounds.r, bounds.t);
    println!("  samples:  {total}");
    println!("  per pixel: max {max}, mean {:.3}", total as f64 / bounds.area().max(1) as f64);
    println!("  empty:    {empty} of {} pixels", bounds.area());

    if let Some((x, y)) = args.pixel {
        if !bounds.contains(x, y) {
            bail!("pixel {x},{y} is outside the deep bounds");
        }
        let count = plane.sample_count(y, x) as usize;
        println!("pixel {x},{y}: {count} sample(s)");
        for sample in 0..count {
            let values: Vec<String> = channels
                .iter()
                .filter_map(|c| plane.value(y, x, sample, c).map(|v| format!("{}={v:.4}", session.channel_name(c))))
                .collect();
            println!("  [{sample}] {}", values.join(" "));
        }
    }
    session.finish("deep")
}
