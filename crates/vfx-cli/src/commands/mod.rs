//! CLI command implementations

pub mod deep;
pub mod info;
pub mod meta;
pub mod plane;
pub mod row;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{error, trace, warn};
use vfx_core::{Channel, ChannelRegistry, ChannelSet, ChannelTable, Host};
use vfx_exr_reader::{ColourCurve, ExrReader, ReaderConfig, Srgb};

use crate::ReaderArgs;

/// [`Host`] backed by the terminal: problems go to the log.
#[derive(Debug, Default)]
pub struct CliHost {
    threads: usize,
    errors: AtomicUsize,
    memory: AtomicUsize,
}

impl CliHost {
    fn new(threads: usize) -> Self {
        Self { threads, ..Self::default() }
    }

    /// Errors reported so far.
    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }

    /// Bytes of reclaimable memory currently registered.
    pub fn memory(&self) -> usize {
        self.memory.load(Ordering::Relaxed)
    }
}

impl Host for CliHost {
    fn error(&self, message: &str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        error!("{message}");
    }

    fn warning(&self, message: &str) {
        warn!("{message}");
    }

    fn thread_count(&self) -> usize {
        if self.threads > 0 {
            self.threads
        } else {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        }
    }

    fn register_memory(&self, owner: &str, bytes: usize) {
        self.memory.fetch_add(bytes, Ordering::Relaxed);
        trace!(owner, bytes, "registered");
    }

    fn release_memory(&self, owner: &str, bytes: usize) {
        let _ = self
            .memory
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |held| Some(held.saturating_sub(bytes)));
        trace!(owner, bytes, "released");
    }
}

/// Everything a command needs to open files the same way.
pub struct Session {
    pub config: ReaderConfig,
    pub registry: ChannelTable,
    pub host: Arc<CliHost>,
    curve: Option<Arc<dyn ColourCurve>>,
}

impl Session {
    pub fn new(args: &ReaderArgs, threads: usize) -> Result<Self> {
        let mut config = ReaderConfig::from_env()
            .with_offset_negative_display_window(!args.crop_negative)
            .with_ignore_part_names(args.ignore_part_names)
            .with_no_prefix(args.no_prefix)
            .with_raw(args.raw);
        if let Some(view) = &args.view {
            config = config.with_view(view.as_str());
        }
        if let Some(edge) = args.edge {
            config = config.with_edge_mode(edge);
        }
        if let Some(mode) = args.read_mode {
            config = config.with_file_read_mode(mode);
        }

        let curve: Option<Arc<dyn ColourCurve>> = match args.curve.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("linear") => None,
            Some("srgb") => Some(Arc::new(Srgb)),
            Some(other) => bail!("unknown colour curve '{other}' (expected linear or srgb)"),
        };

        Ok(Self { config, registry: ChannelTable::new(), host: Arc::new(CliHost::new(threads)), curve })
    }

    /// Opens `path`, turning a failed open into an error.
    pub fn open(&self, path: &Path) -> Result<ExrReader> {
        let host: Arc<dyn Host> = self.host.clone();
        let mut reader = ExrReader::open(path, self.config.clone(), &self.registry, host);
        if let Some(err) = reader.open_error() {
            return Err(anyhow!("{err}")).with_context(|| format!("Failed to open: {}", path.display()));
        }
        if let Some(curve) = &self.curve {
            reader.set_colour_curve(curve.clone());
        }
        Ok(reader)
    }

    /// Parses a comma separated channel list.
    ///
    /// Single letters `R`, `G`, `B`, `A` and `Z` name the standard channels;
    /// anything else goes through the registry as `layer.channel`.
    pub fn channels(&self, list: &str) -> Result<ChannelSet> {
        let mut set = ChannelSet::new();
        for token in list.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let channel = match token {
                "R" => Channel::RED,
                "G" => Channel::GREEN,
                "B" => Channel::BLUE,
                "A" => Channel::ALPHA,
                "Z" => Channel::Z,
                name => self
                    .registry
                    .find_or_create(name)
                    .with_context(|| format!("channel registry is full, cannot add '{name}'"))?,
            };
            set.insert(channel);
        }
        if set.is_empty() {
            bail!("no channels in '{list}'");
        }
        Ok(set)
    }

    /// Registry name of `channel`.
    pub fn channel_name(&self, channel: Channel) -> String {
        self.registry.name(channel).unwrap_or_else(|| channel.to_string())
    }

    /// Fails when the reader reported errors during the command.
    pub fn finish(&self, what: &str) -> Result<()> {
        match self.host.error_count() {
            0 => Ok(()),
            n => bail!("{what}: {n} error(s) reported"),
        }
    }
}

/// Format byte count for display
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        let args = ReaderArgs {
            view: None,
            edge: None,
            read_mode: None,
            crop_negative: false,
            ignore_part_names: false,
            no_prefix: false,
            raw: false,
            curve: None,
        };
        Session::new(&args, 1).unwrap()
    }

    #[test]
    fn channel_lists() {
        let session = session();
        let set = session.channels("R, G,B").unwrap();
        assert_eq!(set.len(), 3);
        assert!(set.contains(Channel::GREEN));

        let set = session.channels("specular.red,Z").unwrap();
        assert!(set.contains(Channel::Z));
        let specular = set.iter().find(|&c| c != Channel::Z).unwrap();
        assert_eq!(session.channel_name(specular), "specular.red");

        assert!(session.channels(" , ").is_err());
    }

    #[test]
    fn unknown_curve_is_rejected() {
        let args = ReaderArgs {
            view: None,
            edge: None,
            read_mode: None,
            crop_negative: false,
            ignore_part_names: false,
            no_prefix: false,
            raw: false,
            curve: Some("rec709".into()),
        };
        assert!(Session::new(&args, 0).is_err());
    }

    #[test]
    fn host_memory_never_underflows() {
        let host = CliHost::new(2);
        host.register_memory("cache", 100);
        host.release_memory("cache", 150);
        assert_eq!(host.memory(), 0);
        assert_eq!(host.thread_count(), 2);
    }

    #[test]
    fn sizes() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MB");
    }
}
