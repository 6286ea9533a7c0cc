//! Three-zone mean HSV sampling of a rectangular region.
//!
//! The region is split into left, middle and right columns of `width / 3`
//! pixels each; the right column also takes the remainder. Pixels whose HSV
//! triple is exactly `(0, 0, 0)` are left out of the averages, which covers
//! both true black and pixels rejected by the optional mask.

use crate::color::{HsvRange, ZoneColor, ZoneColors, rgb_to_hsv};
use crate::error::{Result, TitratorError};
use titrator_traits::Frame;

/// Smallest region edge (exclusive) accepted for sampling.
pub const MIN_REGION_EDGE: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl SampleRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Result<Self> {
        if width <= MIN_REGION_EDGE || height <= MIN_REGION_EDGE {
            return Err(eyre::Report::new(TitratorError::Geometry(format!(
                "region must be larger than {MIN_REGION_EDGE}x{MIN_REGION_EDGE}, got {width}x{height}"
            ))));
        }
        Ok(Self {
            x,
            y,
            width,
            height,
        })
    }

    /// Column ranges `[start, end)` of the left, middle and right zones.
    pub fn zone_columns(&self) -> [(u32, u32); 3] {
        let part = self.width / 3;
        let x = self.x;
        [
            (x, x + part),
            (x + part, x + 2 * part),
            (x + 2 * part, x + self.width),
        ]
    }

    fn fits(&self, frame: &Frame) -> bool {
        let right = u64::from(self.x) + u64::from(self.width);
        let bottom = u64::from(self.y) + u64::from(self.height);
        right <= u64::from(frame.width()) && bottom <= u64::from(frame.height())
    }
}

#[derive(Default)]
struct Accum {
    h: u64,
    s: u64,
    v: u64,
    n: u64,
}

impl Accum {
    #[inline]
    fn push(&mut self, [h, s, v]: [u8; 3]) {
        if h == 0 && s == 0 && v == 0 {
            return;
        }
        self.h += u64::from(h);
        self.s += u64::from(s);
        self.v += u64::from(v);
        self.n += 1;
    }

    fn mean(&self) -> ZoneColor {
        if self.n == 0 {
            return ZoneColor::BLACK;
        }
        let n = self.n as f64;
        ZoneColor::new(self.h as f64 / n, self.s as f64 / n, self.v as f64 / n)
    }
}

/// Stateless sampler; kept as a type so callers can hold it next to the detector.
#[derive(Debug, Default, Clone, Copy)]
pub struct ColorSampler;

impl ColorSampler {
    pub fn new() -> Self {
        Self
    }

    /// Mean HSV of each zone of `region`, optionally restricted to `mask`.
    pub fn sample(
        &self,
        frame: &Frame,
        region: &SampleRegion,
        mask: Option<&HsvRange>,
    ) -> Result<ZoneColors> {
        if !region.fits(frame) {
            return Err(eyre::Report::new(TitratorError::Geometry(format!(
                "region {}x{}+{}+{} lies outside the {}x{} frame",
                region.width,
                region.height,
                region.x,
                region.y,
                frame.width(),
                frame.height()
            ))));
        }

        let mut zones: [Accum; 3] = Default::default();
        for (zone, (x0, x1)) in zones.iter_mut().zip(region.zone_columns()) {
            for y in region.y..region.y + region.height {
                for x in x0..x1 {
                    let hsv = rgb_to_hsv(frame.get_pixel(x, y).0);
                    match mask {
                        Some(m) if !m.contains(hsv) => {}
                        _ => zone.push(hsv),
                    }
                }
            }
        }

        let colors = ZoneColors {
            left: zones[0].mean(),
            middle: zones[1].mean(),
            right: zones[2].mean(),
        };
        tracing::trace!(zones = %colors, "sampled");
        Ok(colors)
    }

    /// Mean HSV over the whole region, used to seed a mask around a selection.
    pub fn region_mean(&self, frame: &Frame, region: &SampleRegion) -> Result<ZoneColor> {
        if !region.fits(frame) {
            return Err(eyre::Report::new(TitratorError::Geometry(
                "region lies outside the frame".into(),
            )));
        }
        let mut acc = Accum::default();
        for y in region.y..region.y + region.height {
            for x in region.x..region.x + region.width {
                acc.push(rgb_to_hsv(frame.get_pixel(x, y).0));
            }
        }
        Ok(acc.mean())
    }
}
