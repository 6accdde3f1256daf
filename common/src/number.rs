use serde::{Deserialize, Serialize};

use crate::error::HygrostatError;

pub const DEFAULT_MIN_VALUE: f32 = 0.0;
pub const DEFAULT_MAX_VALUE: f32 = 100.0;
pub const DEFAULT_STEP: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumberMode {
    #[default]
    Slider,
    Box,
}

/// Bounds and increment of a numeric input such as a humidity set-point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumberRange {
    pub min: f32,
    pub max: f32,
    #[serde(default)]
    pub step: Option<f32>,
    #[serde(default)]
    pub mode: NumberMode,
}

impl Default for NumberRange {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_VALUE,
            max: DEFAULT_MAX_VALUE,
            step: None,
            mode: NumberMode::Slider,
        }
    }
}

impl NumberRange {
    pub fn new(min: f32, max: f32) -> Self {
        Self {
            min,
            max,
            ..Self::default()
        }
    }

    /// Explicit step, or 1.0 shrunk by tenths until it fits inside the range.
    pub fn step(&self) -> f32 {
        if let Some(step) = self.step {
            return step;
        }

        let mut step = DEFAULT_STEP;
        let range = (self.max - self.min).abs();
        if range > 0.0 {
            while range <= step {
                step /= 10.0;
            }
        }
        step
    }

    pub fn coerce(&self, value: f32) -> Result<f32, HygrostatError> {
        if !value.is_finite() {
            return Err(HygrostatError::InvalidSetpoint(format!(
                "{value} is not a finite number"
            )));
        }
        Ok(value.clamp(self.min, self.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_step_is_one() {
        assert_eq!(NumberRange::default().step(), 1.0);
    }

    #[test]
    fn narrow_range_shrinks_step() {
        let range = NumberRange::new(0.0, 1.0);
        assert!((range.step() - 0.1).abs() < f32::EPSILON);

        let tiny = NumberRange::new(0.0, 0.05);
        assert!((tiny.step() - 0.01).abs() < 1e-6);
    }

    #[test]
    fn explicit_step_wins() {
        let range = NumberRange {
            step: Some(5.0),
            ..NumberRange::new(30.0, 99.0)
        };
        assert_eq!(range.step(), 5.0);
    }

    #[test]
    fn coerce_clamps_and_rejects_non_finite() {
        let range = NumberRange::new(30.0, 99.0);

        assert_eq!(range.coerce(10.0), Ok(30.0));
        assert_eq!(range.coerce(120.0), Ok(99.0));
        assert_eq!(range.coerce(45.5), Ok(45.5));
        assert!(matches!(
            range.coerce(f32::NAN),
            Err(HygrostatError::InvalidSetpoint(_))
        ));
    }
}
