//! Process-variable models for simulated axes.
//!
//! `MoveUntil` stops an axis when a process variable crosses a threshold.
//! On real hardware that is a force sensor or a pressure switch; in
//! simulation a `ProcessModel` derives the value from the axis position.

use cell_common::topology::ContactConfig;

/// Maps an axis position to a synthetic process variable.
pub trait ProcessModel: Send + Sync {
    /// Process variable at `position`.
    fn sample(&self, position: f64) -> f64;
}

/// Linear contact model: zero until the surface, then proportional to
/// penetration depth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactModel {
    /// Position at which the tool touches the part
    pub surface: f64,
    /// Pressure per user unit past the surface
    pub stiffness: f64,
}

impl ProcessModel for ContactModel {
    fn sample(&self, position: f64) -> f64 {
        (position - self.surface).max(0.0) * self.stiffness
    }
}

impl From<ContactConfig> for ContactModel {
    fn from(config: ContactConfig) -> Self {
        Self {
            surface: config.surface,
            stiffness: config.stiffness,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_model_zero_before_surface() {
        let model = ContactModel {
            surface: 40.0,
            stiffness: 2.0,
        };
        assert_eq!(model.sample(0.0), 0.0);
        assert_eq!(model.sample(40.0), 0.0);
        assert!((model.sample(42.5) - 5.0).abs() < 1e-9);
    }
}
