//! Decodes one host row through the scanline engine.

use anyhow::{Result, bail};
use vfx_core::Row;

use super::Session;
use crate::RowArgs;

/// Runs the row command.
pub fn run(session: &Session, args: RowArgs) -> Result<()> {
    let reader = session.open(&args.input)?;
    let channels = session.channels(&args.channels)?;
    let bbox = reader.info().bbox;
    let x = args.from.unwrap_or(bbox.x);
    let r = args.to.unwrap_or(bbox.r);
    if r <= x {
        bail!("empty column range {x}..{r}");
    }

    let mut row = Row::new(x, r, &channels);
    if !reader.engine(args.y, x, r, &channels, &mut row) {
        session.finish("row")?;
        bail!("row {} was not decoded", args.y);
    }

    println!("row {} columns {x}..{r}", args.y);
    for channel in channels.iter() {
        let Some(values) = row.get(channel) else { continue };
        let text: Vec<String> = values.iter().map(|v| format!("{v:.4}")).collect();
        println!("  {:<16} {}", session.channel_name(channel), text.join(" "));
    }
    session.finish("row")
}
