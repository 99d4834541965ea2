//! Scaling is PLC-agnostic (§4.1), so it is applied by the Polling Engine
//! after `read_batch`/`read_tag` returns and before a write is encoded,
//! rather than inside each driver.

use crate::tags::structures::ValueVariant;

#[derive(Debug, Clone, Copy)]
pub struct Scaling {
    pub enabled: bool,
    pub factor: f64,
    pub offset: f64,
}

impl Default for Scaling {
    fn default() -> Self {
        Scaling {
            enabled: false,
            factor: 1.0,
            offset: 0.0,
        }
    }
}

impl Scaling {
    /// Applied on read, after decoding, only to numeric values.
    pub fn apply_read(&self, value: ValueVariant) -> ValueVariant {
        if !self.enabled {
            return value;
        }
        match value {
            ValueVariant::Int(i) => ValueVariant::Float(i as f64 * self.factor + self.offset),
            ValueVariant::UInt(u) => ValueVariant::Float(u as f64 * self.factor + self.offset),
            ValueVariant::Float(f) => ValueVariant::Float(f * self.factor + self.offset),
            other => other,
        }
    }

    /// Applied on write, before encoding. Skipped when `factor` is zero.
    pub fn apply_write(&self, engineering_value: f64) -> f64 {
        if !self.enabled || self.factor == 0.0 {
            return engineering_value;
        }
        (engineering_value - self.offset) / self.factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_scaling_passes_through() {
        let s = Scaling::default();
        assert_eq!(s.apply_read(ValueVariant::Int(5)), ValueVariant::Int(5));
        assert_eq!(s.apply_write(10.0), 10.0);
    }

    #[test]
    fn read_scales_numeric_values_only() {
        let s = Scaling {
            enabled: true,
            factor: 2.0,
            offset: 1.0,
        };
        assert_eq!(s.apply_read(ValueVariant::Int(5)), ValueVariant::Float(11.0));
        assert_eq!(
            s.apply_read(ValueVariant::String("x".into())),
            ValueVariant::String("x".into())
        );
    }

    #[test]
    fn write_scaling_skipped_when_factor_zero() {
        let s = Scaling {
            enabled: true,
            factor: 0.0,
            offset: 5.0,
        };
        assert_eq!(s.apply_write(20.0), 20.0);
    }

    #[test]
    fn write_inverts_read_formula() {
        let s = Scaling {
            enabled: true,
            factor: 2.0,
            offset: 1.0,
        };
        // engineering_value = raw*factor + offset => raw = (engineering - offset)/factor
        assert_eq!(s.apply_write(11.0), 5.0);
    }
}
