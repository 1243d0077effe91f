//! File overview: parts, windows and the channel mapping.

use std::fs;

use anyhow::{Context, Result};
use vfx_core::{Box2i, KEY_DEPTH};

use super::{Session, format_size};
use crate::InfoArgs;

fn window(b: &Box2i) -> String {
    format!("({}, {}) - ({}, {})  {}x{}", b.min_x, b.min_y, b.max_x, b.max_y, b.width(), b.height())
}

/// Runs the info command.
pub fn run(session: &Session, args: InfoArgs) -> Result<()> {
    for (i, path) in args.input.iter().enumerate() {
        if i > 0 {
            println!();
        }
        let size = fs::metadata(path).with_context(|| format!("Failed to stat: {}", path.display()))?.len();
        let reader = session.open(path)?;
        let info = reader.info();

        println!("{}", path.display());
        println!("  File size:  {}", format_size(size));
        println!("  Format:     {}", window(&info.format));
        println!(
            "  BBox:       ({}, {}) - ({}, {}){}",
            info.bbox.x,
            info.bbox.y,
            info.bbox.r,
            info.bbox.t,
            if info.black_outside { "  black outside" } else { "" }
        );
        println!("  Aspect:     {}", info.pixel_aspect);
        if let Some(depth) = info.metadata.get_text(KEY_DEPTH) {
            println!("  Depth:      {depth}");
        }
        if !info.views.is_empty() {
            let stereo = if info.stereo { " (stereo)" } else { "" };
            println!("  Views:      {}{stereo}", info.views.join(", "));
        }
        let names: Vec<String> = info.channels.iter().map(|c| session.channel_name(c)).collect();
        println!("  Channels:   {}", names.join(", "));
        if let Some((bounds, deep)) = reader.deep_info() {
            let names: Vec<String> = deep.iter().map(|c| session.channel_name(c)).collect();
            println!("  Deep:       ({}, {}) - ({}, {})  {}", bounds.x, bounds.y, bounds.r, bounds.t, names.join(", "));
        }

        println!("  Parts:      {}", info.parts.len());
        for (index, part) in info.parts.iter().enumerate() {
            println!(
                "    [{index}] {} {} {} {}",
                part.name.as_deref().unwrap_or("-"),
                part.part_type.name(),
                part.compression,
                part.line_order,
            );
            if let Some(view) = &part.view {
                println!("        view:    {view}");
            }
            println!("        data:    {}", window(&part.data_window));
            println!("        display: {}", window(&part.display_window));
            let channels: Vec<String> = part.channels.iter().map(|(name, kind)| format!("{name}:{kind}")).collect();
            println!("        channels: {}", channels.join(" "));
        }

        if args.mapping {
            if let Some(map) = reader.channel_map() {
                println!("  Mapping:");
                for (channel, source) in map.iter() {
                    println!("    {:<20} <- part {} {}", session.channel_name(channel), source.part, source.native());
                }
            }
        }
    }
    session.finish("info")
}
