//! Deep output plane.
//!
//! Variable-length storage: every pixel has a sample count `N` and owns
//! `N * channels` floats laid out sample-major, channel-minor:
//!
//! ```text
//! pixel (x, y), channels {Z, A}, N = 2:
//!   [Z0, A0, Z1, A1]
//! ```
//!
//! Pixels are filled in scan order (y ascending, then x ascending) through
//! [`DeepOutputPlane::set_sample_count`], which appends the pixel's storage.
//! This mirrors how deep readers produce data and keeps the backing store a
//! single `Vec<f32>` reserved once up front.

use crate::channel::{Channel, ChannelSet};
use crate::error::{Error, Result};
use crate::window::Bounds;

/// Deep plane filled pixel by pixel in scan order.
#[derive(Debug, Clone)]
pub struct DeepOutputPlane {
    bounds: Bounds,
    channels: ChannelSet,
    counts: Vec<u32>,
    offsets: Vec<usize>,
    filled: usize,
    data: Vec<f32>,
}

impl DeepOutputPlane {
    /// Creates an empty plane for `bounds` and `channels`.
    pub fn new(bounds: Bounds, channels: ChannelSet) -> Self {
        let area = bounds.area();
        Self {
            bounds,
            channels,
            counts: vec![0; area],
            offsets: vec![0; area],
            filled: 0,
            data: Vec::new(),
        }
    }

    /// Host box covered.
    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Channels stored per sample, in layout order.
    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    /// Reserves storage for `total` samples.
    pub fn reserve_samples(&mut self, total: usize) {
        self.data.reserve(total * self.channels.len());
    }

    /// Samples currently reserved or stored.
    pub fn sample_capacity(&self) -> usize {
        match self.channels.len() {
            0 => 0,
            n => self.data.capacity() / n,
        }
    }

    fn index(&self, y: i32, x: i32) -> Result<usize> {
        if !self.bounds.contains(x, y) {
            return Err(Error::OutOfBounds { x, y, context: "deep plane".into() });
        }
        let b = self.bounds;
        Ok((y - b.y) as usize * b.width() + (x - b.x) as usize)
    }

    /// Declares the sample count of the next pixel in scan order.
    ///
    /// The pixel's values are zero-initialised and can be written through
    /// [`writable`](Self::writable).
    pub fn set_sample_count(&mut self, y: i32, x: i32, count: u32) -> Result<()> {
        let index = self.index(y, x)?;
        if index != self.filled {
            return Err(Error::Deep(format!(
                "pixel ({x}, {y}) filled out of order (expected pixel #{})",
                self.filled
            )));
        }
        self.counts[index] = count;
        self.offsets[index] = self.data.len();
        self.data.resize(self.data.len() + count as usize * self.channels.len(), 0.0);
        self.filled += 1;
        Ok(())
    }

    /// Mutable values of an already declared pixel.
    pub fn writable(&mut self, y: i32, x: i32) -> Result<&mut [f32]> {
        let index = self.index(y, x)?;
        if index >= self.filled {
            return Err(Error::Deep(format!("pixel ({x}, {y}) has no sample count yet")));
        }
        let start = self.offsets[index];
        let len = self.counts[index] as usize * self.channels.len();
        Ok(&mut self.data[start..start + len])
    }

    /// Sample count of a pixel (zero for pixels not yet declared).
    pub fn sample_count(&self, y: i32, x: i32) -> u32 {
        match self.index(y, x) {
            Ok(i) if i < self.filled => self.counts[i],
            _ => 0,
        }
    }

    /// Values of a pixel, sample-major.
    pub fn pixel(&self, y: i32, x: i32) -> &[f32] {
        match self.index(y, x) {
            Ok(i) if i < self.filled => {
                let start = self.offsets[i];
                &self.data[start..start + self.counts[i] as usize * self.channels.len()]
            }
            _ => &[],
        }
    }

    /// One value of one sample.
    pub fn value(&self, y: i32, x: i32, sample: usize, channel: Channel) -> Option<f32> {
        let c = self.channels.position(channel)?;
        self.pixel(y, x).get(sample * self.channels.len() + c).copied()
    }

    /// Total samples stored.
    pub fn total_samples(&self) -> usize {
        self.counts[..self.filled].iter().map(|&c| c as usize).sum()
    }

    /// `true` once every pixel has a sample count.
    pub fn is_complete(&self) -> bool {
        self.filled == self.counts.len()
    }
}
