//! Rectangular image planes.
//!
//! An [`ImagePlane`] covers a host [`Bounds`] for a [`ChannelSet`] and stores
//! every channel as its own contiguous array of one [`DataType`]. Row `0` of
//! each array is the *bottom* row of the bounds (host frame, y up); readers
//! that decode top-down address rows through [`ImagePlane::row_mut`] with a
//! host y and never index storage directly.
//!
//! ```rust
//! use vfx_core::{Bounds, Channel, ChannelSet, DataType, ImagePlane};
//!
//! let mut plane = ImagePlane::new(Bounds::new(0, 0, 2, 2), ChannelSet::rgba(), DataType::F32);
//! plane.fill_channel(Channel::ALPHA, 1.0);
//! assert_eq!(plane.sample(Channel::ALPHA, 1, 1), Some(1.0));
//! ```

use half::f16;
use rayon::prelude::*;

use crate::channel::{Channel, ChannelSet};
use crate::window::Bounds;

/// Storage type of an image plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    /// 8-bit unsigned
    U8,
    /// 16-bit unsigned
    U16,
    /// 16-bit half float
    F16,
    /// 32-bit unsigned
    U32,
    /// 32-bit float
    F32,
}

impl DataType {
    /// Bytes per value.
    pub const fn bytes(self) -> usize {
        match self {
            DataType::U8 => 1,
            DataType::U16 | DataType::F16 => 2,
            DataType::U32 | DataType::F32 => 4,
        }
    }

    /// Full-intensity value of the type (1.0 for floats).
    pub const fn max_value(self) -> f64 {
        match self {
            DataType::U8 => u8::MAX as f64,
            DataType::U16 => u16::MAX as f64,
            DataType::U32 => u32::MAX as f64,
            DataType::F16 | DataType::F32 => 1.0,
        }
    }
}

/// Typed storage for one channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaneData {
    /// 8-bit values
    U8(Vec<u8>),
    /// 16-bit values
    U16(Vec<u16>),
    /// half floats
    F16(Vec<f16>),
    /// 32-bit unsigned values
    U32(Vec<u32>),
    /// 32-bit floats
    F32(Vec<f32>),
}

/// Mutable view of one row of one channel.
#[derive(Debug)]
pub enum PlaneRowMut<'a> {
    /// 8-bit row
    U8(&'a mut [u8]),
    /// 16-bit row
    U16(&'a mut [u16]),
    /// half row
    F16(&'a mut [f16]),
    /// 32-bit unsigned row
    U32(&'a mut [u32]),
    /// float row
    F32(&'a mut [f32]),
}

impl PlaneData {
    fn zeroed(data_type: DataType, len: usize) -> Self {
        match data_type {
            DataType::U8 => PlaneData::U8(vec![0; len]),
            DataType::U16 => PlaneData::U16(vec![0; len]),
            DataType::F16 => PlaneData::F16(vec![f16::ZERO; len]),
            DataType::U32 => PlaneData::U32(vec![0; len]),
            DataType::F32 => PlaneData::F32(vec![0.0; len]),
        }
    }

    fn get(&self, index: usize) -> Option<f64> {
        match self {
            PlaneData::U8(v) => v.get(index).map(|&s| s as f64),
            PlaneData::U16(v) => v.get(index).map(|&s| s as f64),
            PlaneData::F16(v) => v.get(index).map(|&s| s.to_f64()),
            PlaneData::U32(v) => v.get(index).map(|&s| s as f64),
            PlaneData::F32(v) => v.get(index).map(|&s| s as f64),
        }
    }

    fn fill(&mut self, value: f64, threaded: bool) {
        macro_rules! fill_with {
            ($v:expr, $value:expr) => {{
                let value = $value;
                if threaded {
                    $v.par_iter_mut().for_each(|s| *s = value);
                } else {
                    $v.fill(value);
                }
            }};
        }
        match self {
            PlaneData::U8(v) => fill_with!(v, value.clamp(0.0, u8::MAX as f64) as u8),
            PlaneData::U16(v) => fill_with!(v, value.clamp(0.0, u16::MAX as f64) as u16),
            PlaneData::F16(v) => fill_with!(v, f16::from_f64(value)),
            PlaneData::U32(v) => fill_with!(v, value.clamp(0.0, u32::MAX as f64) as u32),
            PlaneData::F32(v) => fill_with!(v, value as f32),
        }
    }

    fn rows_mut(&mut self, start: usize, len: usize) -> PlaneRowMut<'_> {
        match self {
            PlaneData::U8(v) => PlaneRowMut::U8(&mut v[start..start + len]),
            PlaneData::U16(v) => PlaneRowMut::U16(&mut v[start..start + len]),
            PlaneData::F16(v) => PlaneRowMut::F16(&mut v[start..start + len]),
            PlaneData::U32(v) => PlaneRowMut::U32(&mut v[start..start + len]),
            PlaneData::F32(v) => PlaneRowMut::F32(&mut v[start..start + len]),
        }
    }
}

/// Image plane with one contiguous array per channel.
#[derive(Debug, Clone)]
pub struct ImagePlane {
    bounds: Bounds,
    channels: ChannelSet,
    data_type: DataType,
    storage: Vec<PlaneData>,
}

impl ImagePlane {
    /// Creates a zero-filled plane.
    pub fn new(bounds: Bounds, channels: ChannelSet, data_type: DataType) -> Self {
        let len = bounds.area();
        let storage = channels.iter().map(|_| PlaneData::zeroed(data_type, len)).collect();
        Self { bounds, channels, data_type, storage }
    }

    /// Host box covered by the plane.
    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Channels stored.
    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    /// Storage type.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Approximate bytes held.
    pub fn byte_size(&self) -> usize {
        self.bounds.area() * self.channels.len() * self.data_type.bytes()
    }

    /// Fills a channel with `value`, converted to the storage type.
    pub fn fill_channel(&mut self, channel: Channel, value: f64) {
        if let Some(index) = self.channels.position(channel) {
            self.storage[index].fill(value, false);
        }
    }

    /// Like [`fill_channel`](Self::fill_channel) but spread across the rayon pool.
    pub fn fill_channel_threaded(&mut self, channel: Channel, value: f64) {
        if let Some(index) = self.channels.position(channel) {
            self.storage[index].fill(value, true);
        }
    }

    /// Mutable access to host row `y`, columns `[x, r)` of `channel`.
    ///
    /// Returns `None` if the channel is not stored or the span is outside
    /// the plane.
    pub fn row_span_mut(&mut self, channel: Channel, y: i32, x: i32, r: i32) -> Option<PlaneRowMut<'_>> {
        let b = self.bounds;
        if y < b.y || y >= b.t || x < b.x || r > b.r || x > r {
            return None;
        }
        let index = self.channels.position(channel)?;
        let start = (y - b.y) as usize * b.width() + (x - b.x) as usize;
        Some(self.storage[index].rows_mut(start, (r - x) as usize))
    }

    /// Mutable access to the full width of host row `y`.
    pub fn row_mut(&mut self, channel: Channel, y: i32) -> Option<PlaneRowMut<'_>> {
        let b = self.bounds;
        self.row_span_mut(channel, y, b.x, b.r)
    }

    /// Reads one value as `f64`.
    pub fn sample(&self, channel: Channel, x: i32, y: i32) -> Option<f64> {
        if !self.bounds.contains(x, y) {
            return None;
        }
        let index = self.channels.position(channel)?;
        let b = self.bounds;
        self.storage[index].get((y - b.y) as usize * b.width() + (x - b.x) as usize)
    }

    /// Whole storage of one channel.
    pub fn channel_data(&self, channel: Channel) -> Option<&PlaneData> {
        self.channels.position(channel).map(|i| &self.storage[i])
    }
}
