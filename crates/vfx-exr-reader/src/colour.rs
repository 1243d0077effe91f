//! Colour curve signalling.
//!
//! EXR pixels are scene linear, so the reader reports [`LINEAR`] as the curve
//! the host should assume. A host that asked for a different curve installs
//! a [`ColourCurve`]; the row engine then converts red, green and blue after
//! decoding, dividing out alpha around the curve when alpha is present.

/// Curve name EXR data is reported in.
pub const LINEAR: &str = "linear";

/// Host-supplied per-value conversion to linear.
pub trait ColourCurve: Send + Sync {
    /// Curve name.
    fn name(&self) -> &str;

    /// `true` when the curve is the identity.
    fn is_linear(&self) -> bool {
        false
    }

    /// Converts one encoded value to linear.
    fn to_linear(&self, value: f32) -> f32;
}

/// Identity curve.
#[derive(Debug, Clone, Copy, Default)]
pub struct Linear;

impl ColourCurve for Linear {
    fn name(&self) -> &str {
        LINEAR
    }

    fn is_linear(&self) -> bool {
        true
    }

    fn to_linear(&self, value: f32) -> f32 {
        value
    }
}

/// sRGB decoding curve (IEC 61966-2-1).
#[derive(Debug, Clone, Copy, Default)]
pub struct Srgb;

impl ColourCurve for Srgb {
    fn name(&self) -> &str {
        "sRGB"
    }

    #[inline]
    fn to_linear(&self, v: f32) -> f32 {
        if v <= 0.04045 { v / 12.92 } else { ((v + 0.055) / 1.055).powf(2.4) }
    }
}

/// Applies `curve` to `values` in place.
///
/// With `alpha`, each value is unpremultiplied before the curve and
/// premultiplied after it; pixels with zero alpha pass through the curve
/// unchanged.
pub fn apply(curve: &dyn ColourCurve, values: &mut [f32], alpha: Option<&[f32]>) {
    if curve.is_linear() {
        return;
    }
    match alpha {
        Some(alpha) => {
            for (v, &a) in values.iter_mut().zip(alpha) {
                *v = if a != 0.0 && a != 1.0 { curve.to_linear(*v / a) * a } else { curve.to_linear(*v) };
            }
        }
        None => values.iter_mut().for_each(|v| *v = curve.to_linear(*v)),
    }
}
