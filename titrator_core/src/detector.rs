//! Reference-vs-current color comparison.
//!
//! The middle zone sits over the indicator and uses the bare threshold; the
//! outer zones see more ambient drift, so their bands are widened by
//! `threshold_times`. The value channel always gets a 3x wider band.
//! All channel tests are strict `>`.

use std::collections::VecDeque;

use crate::color::{ChannelDiff, ReferenceColors, ZoneColor, ZoneColors};
use crate::error::{Result, TitratorError};

/// Capacity of the middle-zone difference history.
pub const HISTORY_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChangeThresholds {
    pub threshold: f64,
    pub threshold_times: f64,
}

impl Default for ChangeThresholds {
    fn default() -> Self {
        Self {
            threshold: 30.0,
            threshold_times: 1.5,
        }
    }
}

impl ChangeThresholds {
    pub fn new(threshold: f64, threshold_times: f64) -> Result<Self> {
        let ok = |x: f64| x.is_finite() && x > 0.0;
        if !ok(threshold) || !ok(threshold_times) {
            return Err(eyre::Report::new(TitratorError::Config(format!(
                "thresholds must be positive (threshold={threshold}, threshold_times={threshold_times})"
            ))));
        }
        Ok(Self {
            threshold,
            threshold_times,
        })
    }
}

pub struct ChangeDetector {
    thresholds: ChangeThresholds,
    reference: Option<ReferenceColors>,
    history: VecDeque<ChannelDiff>,
}

impl ChangeDetector {
    pub fn new(thresholds: ChangeThresholds) -> Self {
        Self {
            thresholds,
            reference: None,
            history: VecDeque::with_capacity(HISTORY_LEN),
        }
    }

    pub fn thresholds(&self) -> ChangeThresholds {
        self.thresholds
    }

    pub fn reference(&self) -> Option<&ReferenceColors> {
        self.reference.as_ref()
    }

    pub fn is_calibrated(&self) -> bool {
        self.reference.is_some()
    }

    /// Install a reference and clear the history.
    pub fn calibrate(&mut self, colors: ReferenceColors) {
        tracing::debug!(reference = %colors, "detector calibrated");
        self.reference = Some(colors);
        self.history.clear();
    }

    /// Recent middle-zone differences, oldest first. Diagnostics only.
    pub fn history(&self) -> impl ExactSizeIterator<Item = &ChannelDiff> {
        self.history.iter()
    }

    /// Whether any zone moved away from the reference.
    ///
    /// Fails with `InvalidState` when no reference is installed; see
    /// [`ChangeDetector::detect_change_or_calibrate`] for the lazy form.
    pub fn detect_change(&mut self, current: &ZoneColors) -> Result<bool> {
        let reference = self.reference.ok_or_else(not_calibrated)?;
        let t = self.thresholds.threshold;
        let outer = t * self.thresholds.threshold_times;

        let middle = current.middle.abs_diff(&reference.middle);
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(middle);

        let trips = |d: ChannelDiff, band: f64| {
            d.hue > band || d.saturation > band || d.value > band * 3.0
        };
        let left = trips(current.left.abs_diff(&reference.left), outer);
        let mid = trips(middle, t);
        let right = trips(current.right.abs_diff(&reference.right), outer);
        let changed = left || mid || right;

        tracing::debug!(
            changed,
            left,
            middle = mid,
            right,
            h = middle.hue,
            s = middle.saturation,
            v = middle.value,
            "detect_change"
        );
        Ok(changed)
    }

    /// Whether the three zones still show the same solution.
    pub fn check_homogeneity(&self, current: &ZoneColors) -> Result<bool> {
        if self.reference.is_none() {
            return Err(not_calibrated());
        }
        Ok(homogeneous(current, self.thresholds.threshold))
    }

    /// Lazy form of [`detect_change`](Self::detect_change): when no reference
    /// is installed yet, `current` becomes the reference and the verdict is
    /// `false`. The returned flag reports whether that calibration happened.
    pub fn detect_change_or_calibrate(&mut self, current: &ZoneColors) -> (bool, bool) {
        if self.reference.is_none() {
            self.calibrate(*current);
            return (false, true);
        }
        (self.detect_change(current).unwrap_or(false), false)
    }

    /// Lazy form of [`check_homogeneity`](Self::check_homogeneity).
    pub fn check_homogeneity_or_calibrate(&mut self, current: &ZoneColors) -> bool {
        if self.reference.is_none() {
            self.calibrate(*current);
        }
        homogeneous(current, self.thresholds.threshold)
    }
}

fn homogeneous(c: &ZoneColors, threshold: f64) -> bool {
    let spread = |f: fn(&ZoneColor) -> f64| {
        (f(&c.left) - f(&c.middle)).abs() + (f(&c.right) - f(&c.middle)).abs()
    };
    spread(|z| z.hue) < threshold
        && spread(|z| z.saturation) < threshold
        && spread(|z| z.value) < threshold * 2.0
}

fn not_calibrated() -> eyre::Report {
    eyre::Report::new(TitratorError::InvalidState(
        "detector has no reference colors; calibrate first".into(),
    ))
}
