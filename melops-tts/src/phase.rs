//! Training phase gating for attention binarization.

use serde::{Deserialize, Serialize};

/// Iteration thresholds for the hard-alignment phase.
///
/// A negative threshold disables its phase entirely. Once the global step
/// crosses a non-negative threshold the phase stays on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseGate {
    pub binarization_start_iter: i64,
    pub kl_loss_start_iter: i64,
}

/// Phase flags for a single step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhaseFlags {
    /// Hard-alignment mode active
    pub binarize: bool,
    /// Binarization KL loss active (implies `binarize`)
    pub kl_active: bool,
}

impl Default for PhaseGate {
    fn default() -> Self {
        Self {
            binarization_start_iter: 6000,
            kl_loss_start_iter: 18000,
        }
    }
}

impl PhaseGate {
    pub fn new(binarization_start_iter: i64, kl_loss_start_iter: i64) -> Self {
        Self {
            binarization_start_iter,
            kl_loss_start_iter,
        }
    }

    /// Gate with both phases disabled.
    pub fn never() -> Self {
        Self::new(-1, -1)
    }

    pub fn binarize(&self, global_step: u64) -> bool {
        crossed(self.binarization_start_iter, global_step)
    }

    pub fn kl_active(&self, global_step: u64) -> bool {
        self.binarize(global_step) && crossed(self.kl_loss_start_iter, global_step)
    }

    pub fn flags(&self, global_step: u64) -> PhaseFlags {
        PhaseFlags {
            binarize: self.binarize(global_step),
            kl_active: self.kl_active(global_step),
        }
    }
}

fn crossed(threshold: i64, global_step: u64) -> bool {
    u64::try_from(threshold).is_ok_and(|t| global_step >= t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binarize_switches_on_at_threshold() {
        let gate = PhaseGate::new(100, -1);

        assert!((0..100).all(|step| !gate.binarize(step)));
        assert!((100..400).all(|step| gate.binarize(step)));
    }

    #[test]
    fn negative_threshold_never_activates() {
        let gate = PhaseGate::never();

        for step in [0, 1, 10_000, u64::MAX] {
            assert_eq!(gate.flags(step), PhaseFlags::default());
        }
    }

    #[test]
    fn kl_requires_binarization() {
        // KL threshold before the binarization threshold
        let gate = PhaseGate::new(50, 10);

        for step in 0..200 {
            let flags = gate.flags(step);
            if flags.kl_active {
                assert!(flags.binarize, "kl active without binarize at step {step}");
            }
        }
        assert!(!gate.kl_active(20));
        assert!(gate.kl_active(50));
    }

    #[test]
    fn kl_gate_is_independent_threshold() {
        let gate = PhaseGate::new(0, 30);

        assert_eq!(
            gate.flags(29),
            PhaseFlags {
                binarize: true,
                kl_active: false
            }
        );
        assert_eq!(
            gate.flags(30),
            PhaseFlags {
                binarize: true,
                kl_active: true
            }
        );
    }

    #[test]
    fn negative_kl_threshold_keeps_kl_off() {
        let gate = PhaseGate::new(0, -5);

        assert!(gate.binarize(1_000));
        assert!(!gate.kl_active(1_000));
    }
}
