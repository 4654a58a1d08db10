//! Simulation and optimizer configuration
//!
//! Defaults reproduce the classic 110×110 smoke inverse-design setup: 100
//! steps per forward pass, 10 relaxation sweeps per step, 32 outer iterations
//! at learning rate 0.01. Each step's pressure solve resumes from the previous
//! step's result; step 1 starts from zero.

use crate::error::{SimError, SimResult};
use crate::grid::ScalarField2D;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// How `vx[0]` and `vy[0]` are seeded before the first outer iteration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InitialVelocity {
    /// Both components zero
    Zero,
    /// Constant velocity everywhere
    Uniform {
        /// Displacement per step along rows
        vx: f32,
        /// Displacement per step along columns
        vy: f32,
    },
    /// Linear shear `vx[i, j] = (i - 0.5 j) * scale`, `vy = 0`
    Shear {
        /// Shear strength
        scale: f32,
    },
    /// Uniform noise in `[-amplitude, amplitude]` on both components
    Random {
        /// Noise amplitude
        amplitude: f32,
        /// RNG seed for reproducibility
        seed: u64,
    },
}

impl Default for InitialVelocity {
    fn default() -> Self {
        Self::Shear { scale: 0.01 }
    }
}

impl InitialVelocity {
    /// Reject seeds that would put NaN or infinity into `vx[0]`, `vy[0]`
    fn validate(&self) -> SimResult<()> {
        let reason = match *self {
            Self::Zero => None,
            Self::Uniform { vx, vy } => (!(vx.is_finite() && vy.is_finite()))
                .then(|| format!("uniform velocity must be finite, got ({vx}, {vy})")),
            Self::Shear { scale } => (!scale.is_finite())
                .then(|| format!("shear scale must be finite, got {scale}")),
            Self::Random { amplitude, .. } => (!(amplitude.is_finite() && amplitude >= 0.0))
                .then(|| {
                    format!("random amplitude must be finite and non-negative, got {amplitude}")
                }),
        };
        match reason {
            Some(reason) => Err(SimError::invalid_config("initial_velocity", reason)),
            None => Ok(()),
        }
    }

    /// Build the `(vx, vy)` fields for an n×n grid
    #[must_use]
    pub fn fields(&self, n: usize) -> (ScalarField2D, ScalarField2D) {
        match *self {
            Self::Zero => (ScalarField2D::new(n), ScalarField2D::new(n)),
            Self::Uniform { vx, vy } => (
                ScalarField2D::with_value(n, vx),
                ScalarField2D::with_value(n, vy),
            ),
            Self::Shear { scale } => (
                ScalarField2D::from_fn(n, |i, j| (i as f32 - 0.5 * j as f32) * scale),
                ScalarField2D::new(n),
            ),
            Self::Random { amplitude, seed } => {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut vx = ScalarField2D::new(n);
                let mut vy = ScalarField2D::new(n);
                if amplitude > 0.0 {
                    for v in vx.as_mut_slice().iter_mut().chain(vy.as_mut_slice()) {
                        *v = rng.random_range(-amplitude..=amplitude);
                    }
                }
                (vx, vy)
            }
        }
    }
}

/// Configuration for the simulator and the outer optimization loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Grid resolution n (cells per side)
    pub resolution: usize,

    /// Number of outer gradient-descent iterations
    pub iterations: usize,

    /// Relaxation sweeps K per pressure solve (fixed, no convergence check)
    pub relaxation_sweeps: usize,

    /// Time steps per forward pass (including the initial state)
    pub steps: usize,

    /// Grid spacing dx used by divergence and velocity correction
    pub grid_spacing: f32,

    /// Gradient-descent step size
    pub learning_rate: f32,

    /// Start each pressure solve from the previous step's final pressure
    /// (`true`, default) instead of zero
    pub warm_start_pressure: bool,

    /// Seed for the optimized initial velocity
    pub initial_velocity: InitialVelocity,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            resolution: 110,
            iterations: 32,
            relaxation_sweeps: 10,
            steps: 100,
            grid_spacing: 1.0 / 110.0,
            learning_rate: 0.01,
            warm_start_pressure: true,
            initial_velocity: InitialVelocity::default(),
        }
    }
}

impl SimulationConfig {
    /// Default configuration at resolution `n` with `dx = 1 / n`
    #[must_use]
    pub fn with_resolution(n: usize) -> Self {
        Self {
            resolution: n,
            grid_spacing: if n > 0 { 1.0 / n as f32 } else { 0.0 },
            ..Self::default()
        }
    }

    /// Check every parameter before anything is allocated
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidConfig`] naming the first offending parameter.
    pub fn validate(&self) -> SimResult<()> {
        if self.resolution == 0 {
            return Err(SimError::invalid_config("resolution", "must be positive, got 0"));
        }
        if self.steps == 0 {
            return Err(SimError::invalid_config("steps", "must be positive, got 0"));
        }
        if self.relaxation_sweeps == 0 {
            return Err(SimError::invalid_config(
                "relaxation_sweeps",
                "must be positive, got 0",
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(SimError::invalid_config(
                "learning_rate",
                format!("must be finite and positive, got {}", self.learning_rate),
            ));
        }
        if !(self.grid_spacing.is_finite() && self.grid_spacing > 0.0) {
            return Err(SimError::invalid_config(
                "grid_spacing",
                format!("must be finite and positive, got {}", self.grid_spacing),
            ));
        }
        self.initial_velocity.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = SimulationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.resolution, 110);
        assert_eq!(config.relaxation_sweeps, 10);
    }

    #[test]
    fn test_default_warm_starts_pressure() {
        assert!(SimulationConfig::default().warm_start_pressure);
        assert!(SimulationConfig::with_resolution(16).warm_start_pressure);
    }

    #[test]
    fn test_rejects_non_finite_velocity_seeds() {
        let seeds = [
            InitialVelocity::Uniform {
                vx: f32::NAN,
                vy: 0.0,
            },
            InitialVelocity::Uniform {
                vx: 0.0,
                vy: f32::INFINITY,
            },
            InitialVelocity::Shear {
                scale: f32::NEG_INFINITY,
            },
            InitialVelocity::Random {
                amplitude: f32::NAN,
                seed: 1,
            },
        ];
        for seed in seeds {
            let config = SimulationConfig {
                initial_velocity: seed,
                ..SimulationConfig::with_resolution(4)
            };
            match config.validate() {
                Err(SimError::InvalidConfig { parameter, .. }) => {
                    assert_eq!(parameter, "initial_velocity");
                }
                other => panic!("{seed:?}: expected InvalidConfig, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_with_resolution_sets_spacing() {
        let config = SimulationConfig::with_resolution(8);
        assert_eq!(config.resolution, 8);
        assert_eq!(config.grid_spacing, 0.125);
    }

    #[test]
    fn test_rejects_each_non_positive_parameter() {
        let cases: [(&str, fn(&mut SimulationConfig)); 5] = [
            ("resolution", |c| c.resolution = 0),
            ("steps", |c| c.steps = 0),
            ("relaxation_sweeps", |c| c.relaxation_sweeps = 0),
            ("learning_rate", |c| c.learning_rate = -0.1),
            ("grid_spacing", |c| c.grid_spacing = f32::NAN),
        ];
        for (name, mutate) in cases {
            let mut config = SimulationConfig::with_resolution(8);
            mutate(&mut config);
            match config.validate() {
                Err(SimError::InvalidConfig { parameter, .. }) => assert_eq!(parameter, name),
                other => panic!("{name}: expected InvalidConfig, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_shear_seed_matches_formula() {
        let (vx, vy) = InitialVelocity::Shear { scale: 0.01 }.fields(4);
        approx::assert_relative_eq!(vx.get(3, 2), (3.0 - 1.0) * 0.01);
        approx::assert_relative_eq!(vx.get(0, 2), -0.01);
        assert_eq!(vy.max_abs(), 0.0);
    }

    #[test]
    fn test_random_seed_is_reproducible_and_bounded() {
        let init = InitialVelocity::Random {
            amplitude: 0.3,
            seed: 7,
        };
        let (a, _) = init.fields(6);
        let (b, _) = init.fields(6);
        assert_eq!(a, b);
        assert!(a.max_abs() <= 0.3);
        assert!(a.max_abs() > 0.0);
    }

    #[test]
    fn test_random_rejects_negative_amplitude() {
        let config = SimulationConfig {
            initial_velocity: InitialVelocity::Random {
                amplitude: -1.0,
                seed: 0,
            },
            ..SimulationConfig::with_resolution(4)
        };
        assert!(config.validate().is_err());
    }
}
