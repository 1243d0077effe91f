//! Rectangles for file windows and host boxes.
//!
//! Two rectangle types live here because the two sides of a reader think
//! about extents differently:
//!
//! - [`Box2i`] - inclusive `{min, max}` window as stored in image files
//!   (data window, display window). A one-pixel window has `min == max`.
//! - [`Bounds`] - half-open `[x, r) x [y, t)` box in the host frame, the
//!   unit in which rows, planes and deep planes are sized.
//!
//! ```rust
//! use vfx_core::{Box2i, Bounds};
//!
//! let data = Box2i::new(0, 0, 3, 1);
//! assert_eq!((data.width(), data.height()), (4, 2));
//!
//! let b = Bounds::new(0, 0, 4, 2);
//! assert_eq!(b.area(), 8);
//! ```

/// Inclusive integer window (`min` and `max` are both inside).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Box2i {
    /// Left edge (inclusive)
    pub min_x: i32,
    /// Top edge in file space (inclusive)
    pub min_y: i32,
    /// Right edge (inclusive)
    pub max_x: i32,
    /// Bottom edge in file space (inclusive)
    pub max_y: i32,
}

impl Box2i {
    /// Creates a window from its inclusive corners.
    #[inline]
    pub const fn new(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    /// Width in pixels; zero or negative for degenerate windows.
    #[inline]
    pub const fn width(&self) -> i64 {
        self.max_x as i64 - self.min_x as i64 + 1
    }

    /// Height in pixels; zero or negative for degenerate windows.
    #[inline]
    pub const fn height(&self) -> i64 {
        self.max_y as i64 - self.min_y as i64 + 1
    }

    /// `true` when max < min on either axis.
    #[inline]
    pub const fn is_inverted(&self) -> bool {
        self.max_x < self.min_x || self.max_y < self.min_y
    }

    /// Whether the pixel lies inside the window.
    #[inline]
    pub const fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Whether `other` lies entirely inside this window.
    pub const fn contains_box(&self, other: &Box2i) -> bool {
        other.min_x >= self.min_x
            && other.max_x <= self.max_x
            && other.min_y >= self.min_y
            && other.max_y <= self.max_y
    }

    /// Same extent, regardless of position.
    pub const fn same_size(&self, other: &Box2i) -> bool {
        self.width() == other.width() && self.height() == other.height()
    }
}

/// Half-open box in the host frame: `[x, r) x [y, t)`, y up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Bounds {
    /// Left edge (inclusive)
    pub x: i32,
    /// Bottom edge (inclusive)
    pub y: i32,
    /// Right edge (exclusive)
    pub r: i32,
    /// Top edge (exclusive)
    pub t: i32,
}

impl Bounds {
    /// Creates a box from its half-open extents.
    #[inline]
    pub const fn new(x: i32, y: i32, r: i32, t: i32) -> Self {
        Self { x, y, r, t }
    }

    /// An empty box at the origin.
    pub const EMPTY: Bounds = Bounds::new(0, 0, 0, 0);

    /// Width, clamped to zero.
    #[inline]
    pub fn width(&self) -> usize {
        (self.r - self.x).max(0) as usize
    }

    /// Height, clamped to zero.
    #[inline]
    pub fn height(&self) -> usize {
        (self.t - self.y).max(0) as usize
    }

    /// Pixel count.
    #[inline]
    pub fn area(&self) -> usize {
        self.width() * self.height()
    }

    /// `true` when the box holds no pixels.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.r <= self.x || self.t <= self.y
    }

    /// Whether the pixel lies inside the box.
    #[inline]
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.r && y >= self.y && y < self.t
    }

    /// Whether `other` lies entirely inside this box.
    pub fn contains_bounds(&self, other: &Bounds) -> bool {
        other.x >= self.x && other.r <= self.r && other.y >= self.y && other.t <= self.t
    }

    /// Overlap of two boxes, `None` when they do not touch.
    pub fn intersect(&self, other: &Bounds) -> Option<Bounds> {
        let b = Bounds::new(
            self.x.max(other.x),
            self.y.max(other.y),
            self.r.min(other.r),
            self.t.min(other.t),
        );
        (!b.is_empty()).then_some(b)
    }

    /// Grows (or shrinks, for negative values) each side independently.
    pub fn pad(&self, left: i32, bottom: i32, right: i32, top: i32) -> Bounds {
        Bounds::new(self.x - left, self.y - bottom, self.r + right, self.t + top)
    }
}
