//! Semantic channel identifiers and the registry that names them.
//!
//! A [`Channel`] is a small integer id. The host owns the mapping between
//! ids and dotted `layer.channel` names through a [`ChannelRegistry`];
//! readers only ask it to look up or create a channel for a name.
//!
//! The first ids are fixed so readers can bind roles without a lookup:
//!
//! | id | name |
//! |----|------|
//! | 1 | `rgba.red` |
//! | 2 | `rgba.green` |
//! | 3 | `rgba.blue` |
//! | 4 | `rgba.alpha` |
//! | 5 | `depth.Z` |
//! | 6 | `deep.front` |
//! | 7 | `deep.back` |
//! | 8 | `forward.u` |
//! | 9 | `forward.v` |
//!
//! Names without a layer go to `other.<name>`, except the short role
//! aliases (`red`, `green`, `blue`, `alpha`, `Z`, `u`, `v`).
//!
//! ```rust
//! use vfx_core::{Channel, ChannelRegistry, ChannelTable};
//!
//! let table = ChannelTable::new();
//! assert_eq!(table.find_or_create("red"), Some(Channel::RED));
//! let spec = table.find_or_create("specular.red").unwrap();
//! assert_eq!(table.name(spec).as_deref(), Some("specular.red"));
//! ```

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::RwLock;

/// Default registry capacity, matching common compositor limits.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1023;

/// Semantic channel id. `0` is reserved as "no channel".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel(u32);

impl Channel {
    /// Red.
    pub const RED: Channel = Channel(1);
    /// Green.
    pub const GREEN: Channel = Channel(2);
    /// Blue.
    pub const BLUE: Channel = Channel(3);
    /// Alpha.
    pub const ALPHA: Channel = Channel(4);
    /// Flat depth.
    pub const Z: Channel = Channel(5);
    /// Deep sample front depth.
    pub const DEEP_FRONT: Channel = Channel(6);
    /// Deep sample back depth.
    pub const DEEP_BACK: Channel = Channel(7);
    /// Motion u.
    pub const U: Channel = Channel(8);
    /// Motion v.
    pub const V: Channel = Channel(9);

    /// Wraps a raw id.
    #[inline]
    pub const fn from_index(index: u32) -> Self {
        Channel(index)
    }

    /// Raw id.
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// `true` for red, green and blue.
    #[inline]
    pub const fn is_rgb(self) -> bool {
        matches!(self.0, 1..=3)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel#{}", self.0)
    }
}

const STANDARD_NAMES: [&str; 9] = [
    "rgba.red",
    "rgba.green",
    "rgba.blue",
    "rgba.alpha",
    "depth.Z",
    "deep.front",
    "deep.back",
    "forward.u",
    "forward.v",
];

/// Ordered set of channels.
///
/// Iteration order is ascending id order; [`ChannelSet::position`] gives the
/// index of a channel in that order, which is how deep planes lay out the
/// per-sample values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelSet(BTreeSet<Channel>);

impl ChannelSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// `red, green, blue, alpha`.
    pub fn rgba() -> Self {
        [Channel::RED, Channel::GREEN, Channel::BLUE, Channel::ALPHA].into_iter().collect()
    }

    /// Adds a channel; returns `false` when it was already present.
    pub fn insert(&mut self, channel: Channel) -> bool {
        self.0.insert(channel)
    }

    /// Removes a channel.
    pub fn remove(&mut self, channel: Channel) -> bool {
        self.0.remove(&channel)
    }

    /// Membership test.
    pub fn contains(&self, channel: Channel) -> bool {
        self.0.contains(&channel)
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` when empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Ascending iteration.
    pub fn iter(&self) -> impl Iterator<Item = Channel> + '_ {
        self.0.iter().copied()
    }

    /// Index of `channel` in iteration order.
    pub fn position(&self, channel: Channel) -> Option<usize> {
        self.0.iter().position(|&c| c == channel)
    }

    /// Channels present in both sets.
    pub fn intersection(&self, other: &ChannelSet) -> ChannelSet {
        self.0.intersection(&other.0).copied().collect()
    }
}

impl FromIterator<Channel> for ChannelSet {
    fn from_iter<I: IntoIterator<Item = Channel>>(iter: I) -> Self {
        ChannelSet(iter.into_iter().collect())
    }
}

impl Extend<Channel> for ChannelSet {
    fn extend<I: IntoIterator<Item = Channel>>(&mut self, iter: I) {
        self.0.extend(iter)
    }
}

impl<'a> IntoIterator for &'a ChannelSet {
    type Item = Channel;
    type IntoIter = std::iter::Copied<std::collections::btree_set::Iter<'a, Channel>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter().copied()
    }
}

/// Host channel registry.
///
/// Implementations must be thread safe: readers resolve channels while the
/// host may be building other readers.
pub trait ChannelRegistry: Send + Sync {
    /// Looks up `name`, creating a new channel when unknown.
    ///
    /// Returns `None` when the registry is exhausted.
    fn find_or_create(&self, name: &str) -> Option<Channel>;

    /// Full dotted name of a channel.
    fn name(&self, channel: Channel) -> Option<String>;

    /// Number of channels currently registered.
    fn len(&self) -> usize;

    /// `true` when nothing is registered.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
struct TableInner {
    by_name: HashMap<String, Channel>,
    names: Vec<String>,
}

/// In-process [`ChannelRegistry`] with a fixed capacity.
#[derive(Debug)]
pub struct ChannelTable {
    inner: RwLock<TableInner>,
    capacity: usize,
}

impl Default for ChannelTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelTable {
    /// Table with the standard channels and [`DEFAULT_CHANNEL_CAPACITY`].
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Table holding at most `capacity` channels (standard ones included).
    pub fn with_capacity(capacity: usize) -> Self {
        let mut inner = TableInner::default();
        for name in STANDARD_NAMES {
            let channel = Channel(inner.names.len() as u32 + 1);
            inner.names.push(name.to_string());
            inner.by_name.insert(name.to_string(), channel);
        }
        Self {
            inner: RwLock::new(inner),
            capacity: capacity.max(STANDARD_NAMES.len()),
        }
    }

    /// Maximum number of channels.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn canonical(name: &str) -> String {
        if name.contains('.') {
            return name.to_string();
        }
        match name {
            "red" | "r" => "rgba.red".into(),
            "green" | "g" => "rgba.green".into(),
            "blue" | "b" => "rgba.blue".into(),
            "alpha" | "a" => "rgba.alpha".into(),
            "Z" => "depth.Z".into(),
            "u" => "forward.u".into(),
            "v" => "forward.v".into(),
            other => format!("other.{other}"),
        }
    }
}

impl ChannelRegistry for ChannelTable {
    fn find_or_create(&self, name: &str) -> Option<Channel> {
        let name = Self::canonical(name);
        if let Ok(inner) = self.inner.read() {
            if let Some(&channel) = inner.by_name.get(&name) {
                return Some(channel);
            }
        }

        let mut inner = self.inner.write().ok()?;
        // another thread may have created it between the two locks
        if let Some(&channel) = inner.by_name.get(&name) {
            return Some(channel);
        }
        if inner.names.len() >= self.capacity {
            return None;
        }
        let channel = Channel(inner.names.len() as u32 + 1);
        inner.names.push(name.clone());
        inner.by_name.insert(name, channel);
        Some(channel)
    }

    fn name(&self, channel: Channel) -> Option<String> {
        let inner = self.inner.read().ok()?;
        let index = (channel.0 as usize).checked_sub(1)?;
        inner.names.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.inner.read().map(|i| i.names.len()).unwrap_or(0)
    }
}
