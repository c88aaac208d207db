//! Colorspace conversion and rescaling.
//!
//! Conversions are looked up in a capability table mapping each input
//! format to an ordered list of `(output format, transform)` entries.
//! Earlier entries are preferred; [`outputs_for`] filters the list by
//! what the remote side said it can accept.

pub mod converter;
pub mod scale;
pub mod transform;

use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::pixel::{ALL_FORMATS, PixelFormat};
use transform::{
    TransformFn, copy_planes, packed_to_planar, planar_resample, planar_to_packed, swizzle_packed,
};

// ── Re-exports ───────────────────────────────────────────────────

pub use converter::ColorspaceConverter;
pub use scale::ScaleFilter;

// ── Dispatch table ───────────────────────────────────────────────

const PLANAR_PREFERENCE: [PixelFormat; 3] = [
    PixelFormat::Yuv420p,
    PixelFormat::Yuv422p,
    PixelFormat::Yuv444p,
];

/// Layouts a planar source can be painted from.
const PAINT_FORMATS: [PixelFormat; 6] = [
    PixelFormat::Bgrx,
    PixelFormat::Rgbx,
    PixelFormat::Bgra,
    PixelFormat::Rgba,
    PixelFormat::Rgb,
    PixelFormat::Bgr,
];

const PACKED_PREFERENCE: [PixelFormat; 8] = [
    PixelFormat::Bgrx,
    PixelFormat::Rgbx,
    PixelFormat::Bgra,
    PixelFormat::Rgba,
    PixelFormat::Rgb,
    PixelFormat::Bgr,
    PixelFormat::Xrgb,
    PixelFormat::Argb,
];

type ConversionTable = BTreeMap<PixelFormat, Vec<(PixelFormat, TransformFn)>>;

static CONVERSIONS: LazyLock<ConversionTable> = LazyLock::new(build_table);

fn build_table() -> ConversionTable {
    let mut table = ConversionTable::new();
    for input in ALL_FORMATS {
        let mut outputs: Vec<(PixelFormat, TransformFn)> = Vec::new();
        if input.is_planar() {
            outputs.extend(PAINT_FORMATS.map(|f| (f, planar_to_packed as TransformFn)));
            outputs.extend(
                PLANAR_PREFERENCE
                    .into_iter()
                    .filter(|&f| f != input)
                    .map(|f| (f, planar_resample as TransformFn)),
            );
        } else {
            outputs.extend(PLANAR_PREFERENCE.map(|f| (f, packed_to_planar as TransformFn)));
            outputs.extend(
                PACKED_PREFERENCE
                    .into_iter()
                    .filter(|&f| f != input)
                    .map(|f| (f, swizzle_packed as TransformFn)),
            );
        }
        outputs.push((input, copy_planes as TransformFn));
        table.insert(input, outputs);
    }
    table
}

/// The transform converting `src` into `dst`, if the table has one.
pub fn transform_for(src: PixelFormat, dst: PixelFormat) -> Option<TransformFn> {
    CONVERSIONS
        .get(&src)?
        .iter()
        .find(|(out, _)| *out == dst)
        .map(|&(_, f)| f)
}

/// Every format the table accepts as input.
pub fn input_formats() -> Vec<PixelFormat> {
    CONVERSIONS.keys().copied().collect()
}

/// Output formats reachable from `src`, in preference order, restricted
/// to those in `accepted`.
pub fn outputs_for(src: PixelFormat, accepted: &[PixelFormat]) -> Vec<PixelFormat> {
    CONVERSIONS
        .get(&src)
        .map(|outs| {
            outs.iter()
                .map(|&(f, _)| f)
                .filter(|f| accepted.contains(f))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_format_converts_to_itself() {
        for f in ALL_FORMATS {
            assert!(transform_for(f, f).is_some(), "{f}");
        }
    }

    #[test]
    fn packed_inputs_prefer_planar_outputs() {
        let outs = outputs_for(
            PixelFormat::Bgrx,
            &[PixelFormat::Rgb, PixelFormat::Yuv444p, PixelFormat::Yuv420p],
        );
        assert_eq!(
            outs,
            vec![PixelFormat::Yuv420p, PixelFormat::Yuv444p, PixelFormat::Rgb]
        );
    }

    #[test]
    fn planar_sources_only_reach_paint_formats() {
        assert!(transform_for(PixelFormat::Yuv422p, PixelFormat::Bgrx).is_some());
        assert!(transform_for(PixelFormat::Yuv422p, PixelFormat::Argb).is_none());
        assert!(transform_for(PixelFormat::Yuv422p, PixelFormat::Xrgb).is_none());
    }

    #[test]
    fn unadvertised_formats_are_filtered() {
        assert!(outputs_for(PixelFormat::Yuv420p, &[]).is_empty());
        assert_eq!(
            outputs_for(PixelFormat::Yuv420p, &[PixelFormat::Rgba]),
            vec![PixelFormat::Rgba]
        );
    }
}
