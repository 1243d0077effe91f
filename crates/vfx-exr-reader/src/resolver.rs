//! Channel resolver.
//!
//! Maps the union of every part's channel list onto host channels and keeps
//! the reverse map `host channel -> (part, native name)` the decode engines
//! use. When several native channels land on one host channel the better
//! match wins (see [`ChannelSource::is_better_than`]).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace, warn};
use vfx_core::{Channel, ChannelRegistry, ChannelSet, Host};

use crate::attribute::{ChannelDesc, PixelType};
use crate::catalogue::Catalogue;
use crate::config::ReaderConfig;
use crate::error::{ReadError, ReadResult};
use crate::naming::ParsedName;

/// Metadata key written by hosts that keep layer names in channel names.
pub const FULL_LAYER_NAMES: &str = "nuke/node/fullLayerNames";

/// Session-wide "threshold reached" latch.
static THRESHOLD_ALERTED: AtomicBool = AtomicBool::new(false);

/// Where a host channel's data lives in the file.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSource {
    /// Part index.
    pub part: usize,
    /// Channel as declared in the part's header.
    pub desc: ChannelDesc,
    /// Parsed prefixed name.
    pub parsed: ParsedName,
}

impl ChannelSource {
    /// File-native channel name.
    pub fn native(&self) -> &str {
        &self.desc.name
    }

    /// Storage type.
    pub fn pixel_type(&self) -> PixelType {
        self.desc.pixel_type
    }

    /// Decides whether this source should replace `existing` for `view`.
    ///
    /// An exact view match beats a hero-view match and `channel` beats
    /// `.channel`. Otherwise the shorter name wins, so `rotopaint.blue`
    /// replaces a hero-view `left.rotopaint.blue` when `right` is requested.
    /// Equal lengths go to the newcomer.
    pub fn is_better_than(&self, existing: &ChannelSource, view: &str) -> bool {
        let existing_len = existing.native().len();
        let new_len = self.native().len();
        let existing_has_empty_layer = existing.native().starts_with('.');

        if view == self.parsed.view && view != existing.parsed.view {
            true
        } else if view == existing.parsed.view && view != self.parsed.view {
            false
        } else if existing_has_empty_layer && existing_len == new_len + 1 {
            true
        } else {
            new_len <= existing_len
        }
    }
}

/// Result of channel resolution.
#[derive(Debug, Clone, Default)]
pub struct ChannelMap {
    sources: BTreeMap<Channel, ChannelSource>,
    mask: ChannelSet,
    views_matched: bool,
}

impl ChannelMap {
    /// Host channels the file provides.
    pub fn mask(&self) -> &ChannelSet {
        &self.mask
    }

    /// Source of a host channel.
    pub fn get(&self, channel: Channel) -> Option<&ChannelSource> {
        self.sources.get(&channel)
    }

    /// Iterates host channels with their sources.
    pub fn iter(&self) -> impl Iterator<Item = (Channel, &ChannelSource)> {
        self.sources.iter().map(|(&c, s)| (c, s))
    }

    /// A channel carried an exact match for the requested view.
    pub fn is_stereo(&self) -> bool {
        self.views_matched
    }

    /// Groups the requested channels by owning part.
    ///
    /// Within a part every native channel appears once, paired with all host
    /// channels it feeds (a native channel can feed several, e.g. `Y`).
    pub fn by_part(&self, channels: &ChannelSet) -> BTreeMap<usize, Vec<(&ChannelSource, Vec<Channel>)>> {
        let mut parts: BTreeMap<usize, Vec<(&ChannelSource, Vec<Channel>)>> = BTreeMap::new();
        for channel in channels.iter() {
            let Some(source) = self.sources.get(&channel) else { continue };
            let entries = parts.entry(source.part).or_default();
            match entries.iter_mut().find(|(s, _)| s.native() == source.native()) {
                Some((_, targets)) => targets.push(channel),
                None => entries.push((source, vec![channel])),
            }
        }
        parts
    }

    /// Widest storage type among `channels`.
    pub fn widest_type(&self, channels: &ChannelSet) -> Option<PixelType> {
        channels
            .iter()
            .filter_map(|c| self.get(c))
            .map(ChannelSource::pixel_type)
            .max_by_key(|t| match t {
                PixelType::Half => 0,
                PixelType::Uint => 1,
                PixelType::Float => 2,
            })
    }
}

/// Resolution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Flat parts: `Z` is depth.
    Flat,
    /// Deep parts: `Z` is front depth and `ZBack` back depth.
    Deep,
}

/// Whether part names hold layer names (legacy multi-part files).
pub fn part_names_are_layers(catalogue: &Catalogue, config: &ReaderConfig, full_layer_names: Option<i64>) -> bool {
    if config.always_ignore_part_names || !catalogue.is_multipart() {
        return false;
    }
    if let Some(flag) = full_layer_names {
        return flag == 0;
    }
    !catalogue
        .parts
        .iter()
        .any(|part| part.channels.iter().any(|c| c.name.contains('.')))
}

/// Name prefix contributed by a part: `name.` for legacy files, then `view.`
/// unless the name already carries the view token.
fn part_prefix(catalogue: &Catalogue, part: usize, use_part_names: bool) -> String {
    let mut prefix = String::new();
    if !catalogue.is_multipart() {
        return prefix;
    }
    let header = &catalogue.parts[part];
    if use_part_names {
        if let Some(name) = header.name.as_deref().filter(|n| !n.is_empty()) {
            prefix.push_str(name);
            prefix.push('.');
        }
    }
    if let Some(view) = header.view.as_deref().filter(|v| !v.is_empty()) {
        if !prefix.split('.').any(|token| token == view) {
            prefix.push_str(view);
            prefix.push('.');
        }
    }
    prefix
}

/// Maps channels of the file onto host channels.
pub struct Resolver<'a> {
    config: &'a ReaderConfig,
    registry: &'a dyn ChannelRegistry,
    host: &'a dyn Host,
}

impl<'a> Resolver<'a> {
    /// Creates a resolver over a host registry.
    pub fn new(config: &'a ReaderConfig, registry: &'a dyn ChannelRegistry, host: &'a dyn Host) -> Self {
        Self { config, registry, host }
    }

    /// Resolves the channels of `parts`.
    pub fn resolve(
        &self,
        catalogue: &Catalogue,
        parts: impl IntoIterator<Item = usize>,
        full_layer_names: Option<i64>,
        target: Target,
    ) -> ReadResult<ChannelMap> {
        let use_part_names = part_names_are_layers(catalogue, self.config, full_layer_names);
        let view = self.config.view.as_str();
        let mut map = ChannelMap::default();

        // deep channel names are taken as they are: no part prefix, no views
        let deep = target == Target::Deep;
        let views: &[String] = if deep { &[] } else { &catalogue.views };
        for part in parts {
            let prefix = if deep { String::new() } else { part_prefix(catalogue, part, use_part_names) };
            for desc in &catalogue.parts[part].channels {
                let qualified = format!("{prefix}{}", desc.name);
                let parsed = ParsedName::parse(&qualified, views);

                let view_part = if parsed.view.is_empty() { catalogue.hero.as_str() } else { parsed.view.as_str() };
                let exact = view_part == view;
                if !deep && !exact && !(view_part.is_empty() || view_part == catalogue.hero) {
                    trace!(channel = %qualified, view_part, "channel belongs to another view");
                    continue;
                }
                map.views_matched |= exact && !views.is_empty();

                if !desc.is_full_rate() {
                    let message =
                        format!("skipping sub-sampled channel {} ({}x{})", desc.name, desc.x_sampling, desc.y_sampling);
                    warn!(part, "{message}");
                    self.host.warning(&message);
                    continue;
                }

                let source = ChannelSource { part, desc: desc.clone(), parsed };
                for channel in self.lookup(&source.parsed, target)? {
                    let replace = match map.sources.get(&channel) {
                        Some(existing) => source.is_better_than(existing, view),
                        None => true,
                    };
                    if replace {
                        map.sources.insert(channel, source.clone());
                    }
                    map.mask.insert(channel);
                }
            }
        }

        debug!(channels = map.mask.len(), use_part_names, view, "resolved channels");
        Ok(map)
    }

    fn lookup(&self, parsed: &ParsedName, target: Target) -> ReadResult<Vec<Channel>> {
        if parsed.is_luminance() {
            return Ok(if self.config.raw {
                vec![Channel::RED]
            } else {
                vec![Channel::RED, Channel::GREEN, Channel::BLUE]
            });
        }
        if target == Target::Deep && parsed.layer.is_empty() {
            match parsed.channel.as_str() {
                "Z" => return Ok(vec![Channel::DEEP_FRONT]),
                "ZBack" => return Ok(vec![Channel::DEEP_BACK]),
                _ => {}
            }
        }

        let name = parsed.host_name();
        let created = self.registry.find_or_create(&name);
        self.check_threshold();
        match created {
            Some(channel) => Ok(vec![channel]),
            None if self.config.channel_ceiling_is_error => Err(ReadError::TooManyChannels(format!(
                "exceeded the limit of {} channels adding {name}",
                self.registry.len()
            ))),
            None => {
                let message = format!("Cannot assign channel number to {name}");
                warn!("{message}");
                self.host.warning(&message);
                Ok(Vec::new())
            }
        }
    }

    fn check_threshold(&self) {
        let threshold = self.config.channel_warning_threshold;
        let count = self.registry.len();
        if count < threshold {
            THRESHOLD_ALERTED.store(false, Ordering::Relaxed);
            return;
        }
        if threshold > 0 && count >= threshold && !THRESHOLD_ALERTED.swap(true, Ordering::Relaxed) {
            let message = format!("reached the channel warning threshold of {threshold} channels");
            warn!(count, "{message}");
            self.host.warning(&message);
        }
    }
}
