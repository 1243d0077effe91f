//! Header attributes to host metadata.
//!
//! Every typed attribute of a part is published under `exr/<name>` (or the
//! bare name when the prefix is disabled). Vectors, boxes and matrices are
//! flattened into list values; the channel list, preview and tile
//! description are structural and not published.

use tracing::trace;
use vfx_core::{MetaBundle, MetaValue, KEY_DEPTH, KEY_VIEW_NAMES};

use crate::attribute::AttributeValue;
use crate::header::PartHeader;

/// Prefix attached to every attribute key.
pub const EXR_PREFIX: &str = "exr/";
/// Key of the chunk count attribute, prefixed.
pub const CHUNK_COUNT_KEY: &str = "exr/chunkCount";

/// Bit depth label for 32-bit float data.
pub const DEPTH_FLOAT: &str = "float";
/// Bit depth label for 32-bit unsigned data.
pub const DEPTH_32: &str = "32-bit uint";
/// Bit depth label for half data.
pub const DEPTH_HALF: &str = "half";

/// Metadata key for attribute `name`.
pub fn attribute_key(name: &str, no_prefix: bool) -> String {
    if no_prefix { name.to_string() } else { format!("{EXR_PREFIX}{name}") }
}

/// Formats a packed SMPTE time code as `HH:MM:SS:FF`.
fn time_code(packed: u32) -> String {
    let bcd = |shift: u32, tens_bits: u32| {
        let units = (packed >> shift) & 0xf;
        let tens = (packed >> (shift + 4)) & ((1 << tens_bits) - 1);
        tens * 10 + units
    };
    let separator = if packed & (1 << 6) != 0 { ';' } else { ':' };
    format!("{:02}:{:02}:{:02}{separator}{:02}", bcd(24, 2), bcd(16, 3), bcd(8, 3), bcd(0, 2))
}

fn floats(values: &[f32]) -> MetaValue {
    MetaValue::Floats(values.iter().map(|&v| v as f64).collect())
}

fn ints(values: &[i32]) -> MetaValue {
    MetaValue::Ints(values.iter().map(|&v| v as i64).collect())
}

/// Host representation of one attribute value, `None` for structural ones.
pub fn convert(value: &AttributeValue) -> Option<MetaValue> {
    let converted = match value {
        AttributeValue::Text(s) => MetaValue::Text(s.clone()),
        AttributeValue::TextVector(v) => MetaValue::Texts(v.clone()),
        AttributeValue::Int(v) => MetaValue::Int(*v as i64),
        AttributeValue::Float(v) => MetaValue::Float(*v as f64),
        AttributeValue::Double(v) => MetaValue::Float(*v),
        AttributeValue::V2i(v) => ints(v),
        AttributeValue::V3i(v) => ints(v),
        AttributeValue::V2f(v) => floats(v),
        AttributeValue::V3f(v) => floats(v),
        AttributeValue::Box2i(b) => MetaValue::Ints(vec![b.min_x as i64, b.min_y as i64, b.max_x as i64, b.max_y as i64]),
        AttributeValue::Box2f(v) => floats(v),
        AttributeValue::M33f(v) => floats(v),
        AttributeValue::M44f(v) => floats(v),
        AttributeValue::Chromaticities(v) => floats(v),
        AttributeValue::KeyCode(v) => ints(v),
        AttributeValue::Rational(n, d) => MetaValue::Float(if *d == 0 { 0.0 } else { *n as f64 / *d as f64 }),
        AttributeValue::TimeCode(packed, _) => MetaValue::Text(time_code(*packed)),
        AttributeValue::Compression(c) => MetaValue::Text(c.name().to_string()),
        AttributeValue::LineOrder(order) => MetaValue::Text(order.to_string()),
        AttributeValue::EnvMap(v) => MetaValue::Int(*v as i64),
        AttributeValue::DeepImageState(v) => MetaValue::Int(*v as i64),
        AttributeValue::Channels(_)
        | AttributeValue::Preview { .. }
        | AttributeValue::Tiles(_)
        | AttributeValue::Custom { .. } => return None,
    };
    Some(converted)
}

/// Publishes every attribute of `header` into `bundle`, overwriting earlier keys.
pub fn publish_header(header: &PartHeader, bundle: &mut MetaBundle, no_prefix: bool) {
    for attribute in &header.attributes {
        match convert(&attribute.value) {
            Some(value) => bundle.set(attribute_key(&attribute.name, no_prefix), value),
            None => trace!(name = %attribute.name, kind = %attribute.kind, "attribute not published"),
        }
    }
}

/// Bit depth label from per-type channel counts `[uint, half, float]`.
///
/// Float wins over uint, and any half channel overrides both.
pub fn depth_label(counts: [usize; 3]) -> Option<&'static str> {
    let [uint, half, float] = counts;
    if half > 0 {
        Some(DEPTH_HALF)
    } else if float > 0 {
        Some(DEPTH_FLOAT)
    } else if uint > 0 {
        Some(DEPTH_32)
    } else {
        None
    }
}

/// Records the bit depth of `parts` under [`KEY_DEPTH`].
pub fn publish_depth<'a>(parts: impl IntoIterator<Item = &'a PartHeader>, bundle: &mut MetaBundle) {
    let mut counts = [0usize; 3];
    for part in parts {
        for (total, n) in counts.iter_mut().zip(part.pixel_type_counts()) {
            *total += n;
        }
    }
    if let Some(label) = depth_label(counts) {
        bundle.set(KEY_DEPTH, MetaValue::Text(label.to_string()));
    }
}

/// Records the view list, newline separated, under [`KEY_VIEW_NAMES`].
pub fn publish_views(views: &[String], bundle: &mut MetaBundle) {
    if !views.is_empty() {
        bundle.set(KEY_VIEW_NAMES, MetaValue::Text(views.join("\n")));
    }
}

/// Adds `added_edges` to the chunk count, when the file declared one.
pub fn bump_chunk_count(bundle: &mut MetaBundle, added_edges: i64) {
    if added_edges <= 0 {
        return;
    }
    if let Some(count) = bundle.get_int(CHUNK_COUNT_KEY) {
        bundle.set(CHUNK_COUNT_KEY, MetaValue::Int(count + added_edges));
    }
}
