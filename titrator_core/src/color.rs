//! HSV color types and the fixed RGB to HSV conversion.
//!
//! Channels follow the 8-bit convention used by common vision libraries:
//! hue in `0..=179` (degrees / 2), saturation and value in `0..=255`.

use std::fmt;

use crate::error::{Result, TitratorError};

pub const HUE_MAX: u8 = 179;
pub const CHANNEL_MAX: u8 = 255;

/// Convert one RGB8 pixel to 8-bit HSV.
#[inline]
pub fn rgb_to_hsv([r, g, b]: [u8; 3]) -> [u8; 3] {
    let (rf, gf, bf) = (f32::from(r), f32::from(g), f32::from(b));
    let v = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = v - min;

    let s = if v > 0.0 { 255.0 * delta / v } else { 0.0 };

    let h_deg = if delta == 0.0 {
        0.0
    } else if v == rf {
        60.0 * (gf - bf) / delta
    } else if v == gf {
        120.0 + 60.0 * (bf - rf) / delta
    } else {
        240.0 + 60.0 * (rf - gf) / delta
    };
    let h_deg = if h_deg < 0.0 { h_deg + 360.0 } else { h_deg };

    [
        ((h_deg / 2.0).round() as u8).min(HUE_MAX),
        s.round() as u8,
        v as u8,
    ]
}

/// Mean HSV of one zone. Components are clamped to their channel range.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ZoneColor {
    pub hue: f64,
    pub saturation: f64,
    pub value: f64,
}

impl ZoneColor {
    pub const BLACK: Self = Self {
        hue: 0.0,
        saturation: 0.0,
        value: 0.0,
    };

    pub fn new(hue: f64, saturation: f64, value: f64) -> Self {
        let clamp = |x: f64, max: u8| {
            if x.is_finite() {
                x.clamp(0.0, f64::from(max))
            } else {
                0.0
            }
        };
        Self {
            hue: clamp(hue, HUE_MAX),
            saturation: clamp(saturation, CHANNEL_MAX),
            value: clamp(value, CHANNEL_MAX),
        }
    }

    /// Per-channel absolute difference.
    pub fn abs_diff(&self, other: &ZoneColor) -> ChannelDiff {
        ChannelDiff {
            hue: (self.hue - other.hue).abs(),
            saturation: (self.saturation - other.saturation).abs(),
            value: (self.value - other.value).abs(),
        }
    }
}

impl fmt::Display for ZoneColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "H{} S{} V{}",
            self.hue as u32, self.saturation as u32, self.value as u32
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChannelDiff {
    pub hue: f64,
    pub saturation: f64,
    pub value: f64,
}

/// Left, middle and right zone colors of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ZoneColors {
    pub left: ZoneColor,
    pub middle: ZoneColor,
    pub right: ZoneColor,
}

/// Zone colors captured at calibration time.
pub type ReferenceColors = ZoneColors;

impl ZoneColors {
    pub fn uniform(c: ZoneColor) -> Self {
        Self {
            left: c,
            middle: c,
            right: c,
        }
    }
}

impl fmt::Display for ZoneColors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L: {} M: {} R: {}", self.left, self.middle, self.right)
    }
}

/// Inclusive per-channel HSV window used to mask out background pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HsvRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvRange {
    pub const FULL: Self = Self {
        lower: [0, 0, 0],
        upper: [HUE_MAX, CHANNEL_MAX, CHANNEL_MAX],
    };

    pub fn new(lower: [u8; 3], upper: [u8; 3]) -> Result<Self> {
        if lower[0] > HUE_MAX || upper[0] > HUE_MAX {
            return Err(eyre::Report::new(TitratorError::Config(format!(
                "hue bounds must be within 0..={HUE_MAX}"
            ))));
        }
        if lower.iter().zip(upper.iter()).any(|(lo, hi)| lo > hi) {
            return Err(eyre::Report::new(TitratorError::Config(
                "mask lower bound exceeds upper bound".into(),
            )));
        }
        Ok(Self { lower, upper })
    }

    /// Seed a window around a sampled mean: ±10 hue, ±40 saturation and value.
    pub fn around(mean: ZoneColor) -> Self {
        let lo = |x: f64, d: f64| (x - d).max(0.0) as u8;
        let hi = |x: f64, d: f64, max: u8| (x + d).min(f64::from(max)) as u8;
        Self {
            lower: [
                lo(mean.hue, 10.0),
                lo(mean.saturation, 40.0),
                lo(mean.value, 40.0),
            ],
            upper: [
                hi(mean.hue, 10.0, HUE_MAX),
                hi(mean.saturation, 40.0, CHANNEL_MAX),
                hi(mean.value, 40.0, CHANNEL_MAX),
            ],
        }
    }

    #[inline]
    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|i| self.lower[i] <= hsv[i] && hsv[i] <= self.upper[i])
    }
}
