//! Configuration options for the picker.

use serde::{Deserialize, Serialize};

use crate::error::{PickError, Result};

/// Configuration for a picker instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickerOptions {
    /// Side length, in device pixels, of the square offscreen pick target.
    ///
    /// Must be odd so the target has a single center texel, and should be at
    /// least as large as the widest point/line rasterization footprint.
    pub target_size: u32,

    /// Whether to render the debug overlay after each pick, showing the
    /// color-coded contents of the pick buffer.
    pub debug: bool,
}

impl Default for PickerOptions {
    fn default() -> Self {
        Self {
            target_size: 9,
            debug: false,
        }
    }
}

impl PickerOptions {
    /// Validates the options.
    ///
    /// # Errors
    /// Returns [`PickError::InvalidTargetSize`] if the target size is zero or
    /// even.
    pub fn validate(&self) -> Result<()> {
        if self.target_size == 0 || self.target_size % 2 == 0 {
            return Err(PickError::InvalidTargetSize(self.target_size));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let options = PickerOptions::default();
        assert_eq!(options.target_size, 9);
        assert!(!options.debug);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn even_and_zero_sizes_are_rejected() {
        for size in [0, 2, 8, 16] {
            let options = PickerOptions {
                target_size: size,
                ..PickerOptions::default()
            };
            assert!(matches!(
                options.validate(),
                Err(PickError::InvalidTargetSize(s)) if s == size
            ));
        }
    }

    #[test]
    fn options_serialize_round_trip() {
        let options = PickerOptions {
            target_size: 11,
            debug: true,
        };
        let json = serde_json::to_string(&options).unwrap();
        let back: PickerOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back.target_size, 11);
        assert!(back.debug);
    }
}
