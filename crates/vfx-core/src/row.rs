//! One output scanline.
//!
//! A [`Row`] covers the half-open span `[x, r)` and owns one contiguous
//! `f32` array per channel. Slices handed out by [`Row::writable`] start at
//! pixel `x`, so pixel `px` lives at index `px - x`.

use std::collections::BTreeMap;

use crate::channel::{Channel, ChannelSet};

/// Per-channel float storage for one host row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    x: i32,
    r: i32,
    data: BTreeMap<Channel, Vec<f32>>,
}

impl Row {
    /// Creates a zeroed row spanning `[x, r)` for `channels`.
    pub fn new(x: i32, r: i32, channels: &ChannelSet) -> Self {
        let width = (r - x).max(0) as usize;
        let data = channels.iter().map(|c| (c, vec![0.0; width])).collect();
        Self { x, r: r.max(x), data }
    }

    /// Left edge (inclusive).
    pub fn x(&self) -> i32 {
        self.x
    }

    /// Right edge (exclusive).
    pub fn r(&self) -> i32 {
        self.r
    }

    /// Pixel count.
    pub fn width(&self) -> usize {
        (self.r - self.x) as usize
    }

    /// Channels this row stores.
    pub fn channels(&self) -> ChannelSet {
        self.data.keys().copied().collect()
    }

    /// Read access to a channel, `None` if the row does not store it.
    pub fn get(&self, channel: Channel) -> Option<&[f32]> {
        self.data.get(&channel).map(Vec::as_slice)
    }

    /// Write access to a channel, `None` if the row does not store it.
    pub fn writable(&mut self, channel: Channel) -> Option<&mut [f32]> {
        self.data.get_mut(&channel).map(Vec::as_mut_slice)
    }

    /// Sets every pixel of `channel` in `[from, to)` (host x) to `value`.
    ///
    /// The span is clipped to the row.
    pub fn fill_span(&mut self, channel: Channel, from: i32, to: i32, value: f32) {
        let (x, r) = (self.x, self.r);
        if let Some(buf) = self.writable(channel) {
            let a = (from.clamp(x, r) - x) as usize;
            let b = (to.clamp(x, r) - x) as usize;
            if a < b {
                buf[a..b].fill(value);
            }
        }
    }

    /// Sets the whole channel to `value`.
    pub fn fill(&mut self, channel: Channel, value: f32) {
        let (x, r) = (self.x, self.r);
        self.fill_span(channel, x, r, value);
    }

    /// Copies `from` into `to` over the whole row. Both must be stored.
    pub fn copy_channel(&mut self, from: Channel, to: Channel) {
        if from == to {
            return;
        }
        if let Some(src) = self.data.get(&from).cloned() {
            if let Some(dst) = self.data.get_mut(&to) {
                dst.copy_from_slice(&src);
            }
        }
    }
}
