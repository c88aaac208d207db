//! Quality and speed mapping shared by the colorspace stage and the
//! video encoder.
//!
//! [`profile_for_quality`] is the single source of truth for chroma
//! sampling. The window pipeline picks its converter output format from
//! it and the encoder decides whether to rebuild from it, so the two
//! always change together.

use crate::pixel::PixelFormat;

/// Lowest quality that gets 4:2:2 chroma.
pub const I422_MIN_QUALITY: u8 = 70;
/// Lowest quality that gets 4:4:4 chroma.
pub const I444_MIN_QUALITY: u8 = 90;

/// Encoder profile, named after the H.264 profile it mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    Baseline,
    High422,
    High444,
}

impl Profile {
    pub const fn name(self) -> &'static str {
        match self {
            Profile::Baseline => "baseline",
            Profile::High422 => "high422",
            Profile::High444 => "high444",
        }
    }
}

/// Chroma sampling plus profile for one quality level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EncodingProfile {
    pub sampling: PixelFormat,
    pub profile: Profile,
}

/// Map a quality (0..=100) to the chroma sampling and profile.
pub const fn profile_for_quality(quality: u8) -> EncodingProfile {
    if quality >= I444_MIN_QUALITY {
        EncodingProfile {
            sampling: PixelFormat::Yuv444p,
            profile: Profile::High444,
        }
    } else if quality >= I422_MIN_QUALITY {
        EncodingProfile {
            sampling: PixelFormat::Yuv422p,
            profile: Profile::High422,
        }
    } else {
        EncodingProfile {
            sampling: PixelFormat::Yuv420p,
            profile: Profile::Baseline,
        }
    }
}

/// Quantizer step for a quality level. Quality 100 is lossless.
pub const fn quantizer_for_quality(quality: u8) -> u8 {
    if quality >= 100 {
        1
    } else {
        2 + (99 - quality) / 8
    }
}

// ── Presets ──────────────────────────────────────────────────────

/// One step of the fixed speed scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preset {
    pub name: &'static str,
    pub zstd_level: i32,
}

/// Ordered fastest first.
pub const PRESETS: [Preset; 9] = [
    Preset { name: "ultrafast", zstd_level: 1 },
    Preset { name: "superfast", zstd_level: 2 },
    Preset { name: "veryfast", zstd_level: 3 },
    Preset { name: "faster", zstd_level: 4 },
    Preset { name: "fast", zstd_level: 5 },
    Preset { name: "medium", zstd_level: 7 },
    Preset { name: "slow", zstd_level: 9 },
    Preset { name: "slower", zstd_level: 12 },
    Preset { name: "veryslow", zstd_level: 15 },
];

/// speed 100 → `ultrafast`, speed 0 → `veryslow`.
pub const fn preset_for_speed(speed: u8) -> &'static Preset {
    let speed = (if speed > 100 { 100 } else { speed }) as usize;
    &PRESETS[(100 - speed) * (PRESETS.len() - 1) / 100]
}
