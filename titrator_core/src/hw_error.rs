//! Maps `Box<dyn Error>` from trait boundaries to typed `TitratorError`.
//!
//! The traits in `titrator_traits` use `Box<dyn Error + Send + Sync>`; this
//! module converts those to our typed error enum, with an optional
//! feature-gated path for `titrator_hardware::HwError` downcasting.

use crate::error::TitratorError;

/// Which seam produced the error; decides the fallback variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seam {
    Camera,
    Serial,
}

/// Map a trait-boundary error to a typed `TitratorError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to the seam the error came from.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static), seam: Seam) -> TitratorError {
    if let Some(te) = e.downcast_ref::<TitratorError>() {
        return te.clone();
    }

    #[cfg(feature = "hardware-errors")]
    {
        use titrator_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::Capture(_) | HwError::Timeout | HwError::Image(_) => {
                    TitratorError::Capture(hw.to_string())
                }
                HwError::Serial(_) | HwError::Closed => TitratorError::Hardware(hw.to_string()),
                HwError::Io(_) => match seam {
                    Seam::Camera => TitratorError::Capture(hw.to_string()),
                    Seam::Serial => TitratorError::Hardware(hw.to_string()),
                },
            };
        }
    }

    let s = e.to_string();
    match seam {
        Seam::Camera => TitratorError::Capture(s),
        Seam::Serial => TitratorError::Hardware(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_seam() {
        let e = std::io::Error::other("port vanished");
        assert_eq!(
            map_hw_error(&e, Seam::Serial),
            TitratorError::Hardware("port vanished".into())
        );
        assert!(matches!(
            map_hw_error(&e, Seam::Camera),
            TitratorError::Capture(_)
        ));
    }

    #[cfg(feature = "hardware-errors")]
    #[test]
    fn hw_timeout_is_capture() {
        let e = titrator_hardware::error::HwError::Timeout;
        assert!(matches!(
            map_hw_error(&e, Seam::Serial),
            TitratorError::Capture(_)
        ));
    }
}
