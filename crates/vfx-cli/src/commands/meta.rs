//! Published metadata listing.

use anyhow::Result;

use super::Session;
use crate::MetaArgs;

/// Runs the meta command.
pub fn run(session: &Session, args: MetaArgs) -> Result<()> {
    let reader = session.open(&args.input)?;
    let metadata = &reader.info().metadata;
    let keys = metadata.iter().filter(|(key, _)| args.grep.as_deref().is_none_or(|g| key.contains(g)));
    for (key, value) in keys {
        println!("{key:<32} {value}");
    }
    session.finish("meta")
}
