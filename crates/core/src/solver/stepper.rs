//! Forward time-stepping of the smoke simulation
//!
//! For every step `t = 1..steps`:
//!
//! 1. Self-advect `vx`, `vy` along the step `t-1` velocity (predicted `vxU`, `vyU`)
//! 2. Divergence of the predicted velocity
//! 3. `K` Jacobi sweeps of the pressure solve
//! 4. Pressure-gradient correction → `vx[t]`, `vy[t]`
//! 5. Advect the smoke density along the **corrected** step `t` velocity
//!
//! Velocity advection backtraces with the previous step's velocity while
//! density advection uses the current one. This asymmetry is part of the
//! physics and must stay as is.
//!
//! Every intermediate grid lands in a write-once arena slot so the backward
//! pass can replay the trajectory exactly. A finite check follows each kernel;
//! the first NaN/Inf aborts the pass with [`SimError::NonFinite`].

use super::advection::{advect, advect_velocity};
use super::projection::{correct_velocity, divergence, relax_sweep};
use crate::config::SimulationConfig;
use crate::error::{SimError, SimResult, Stage};
use crate::grid::{IterationIndexedField, ScalarField2D, TimeIndexedField};
use std::time::{Duration, Instant};
use tracing::debug;

/// Which pass a density snapshot belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// Forward pass of outer iteration `i`
    Iteration(usize),
    /// Forward pass with the optimized initial velocity
    Final,
}

/// Receives per-step density snapshots during a forward pass
///
/// Preview windows and frame exporters live outside this crate and plug in
/// through this trait. Closures taking `(PassKind, step, &ScalarField2D)`
/// implement it directly.
pub trait FrameSink {
    /// Called once per simulated step `t >= 1` after the density is advected
    fn on_frame(&mut self, pass: PassKind, step: usize, density: &ScalarField2D);
}

impl<F> FrameSink for F
where
    F: FnMut(PassKind, usize, &ScalarField2D),
{
    fn on_frame(&mut self, pass: PassKind, step: usize, density: &ScalarField2D) {
        self(pass, step, density);
    }
}

/// Sink that keeps every snapshot in memory
#[derive(Debug, Default)]
pub struct FrameRecorder {
    /// Recorded `(pass, step, density)` triples in emission order
    pub frames: Vec<(PassKind, usize, ScalarField2D)>,
}

impl FrameSink for FrameRecorder {
    fn on_frame(&mut self, pass: PassKind, step: usize, density: &ScalarField2D) {
        self.frames.push((pass, step, density.clone()));
    }
}

/// Diagnostics of one forward pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassStats {
    /// Terminal mean squared error
    pub loss: f32,
    /// Largest |divergence| of the last step's predicted velocity
    pub divergence_before: f32,
    /// Largest |divergence| of the last step's corrected velocity
    pub divergence_after: f32,
    /// Total smoke density at the last step
    pub mass: f32,
    /// Wall time spent inside the frame sink during the pass
    pub sink_time: Duration,
}

/// All fields of one simulated trajectory plus the target and the loss
#[derive(Debug, Clone)]
pub struct SimulationState {
    config: SimulationConfig,
    /// Row velocity per step; `t = 0` is the optimized parameter
    pub vx: TimeIndexedField,
    /// Column velocity per step; `t = 0` is the optimized parameter
    pub vy: TimeIndexedField,
    /// Smoke density per step; `t = 0` is the initial density
    pub smoke: TimeIndexedField,
    /// Advected row velocity before projection
    pub vx_advected: TimeIndexedField,
    /// Advected column velocity before projection
    pub vy_advected: TimeIndexedField,
    /// Divergence of the advected velocity
    pub divergence: TimeIndexedField,
    /// Pressure per step and sweep
    pub pressure: IterationIndexedField,
    target: ScalarField2D,
    stats: Option<PassStats>,
}

/// Reject fields whose resolution or values cannot enter the simulation
fn check_input(name: &str, field: &ScalarField2D, n: usize) -> SimResult<()> {
    if field.resolution() != n {
        return Err(SimError::DimensionMismatch {
            name: name.to_string(),
            expected: n * n,
            actual: field.as_slice().len(),
        });
    }
    if !field.is_finite() {
        return Err(SimError::MalformedInput {
            name: name.to_string(),
            line: 0,
            reason: "contains non-finite values".to_string(),
        });
    }
    Ok(())
}

/// Finite check after a kernel
pub(crate) fn ensure_finite(
    field: &ScalarField2D,
    stage: Stage,
    step: usize,
    sweep: Option<usize>,
) -> SimResult<()> {
    if field.is_finite() {
        Ok(())
    } else {
        Err(SimError::NonFinite { stage, step, sweep })
    }
}

/// Mean squared error `(1/n²)·Σ(target - density)²`
#[must_use]
pub fn mean_squared_error(target: &ScalarField2D, density: &ScalarField2D) -> f32 {
    let n = target.resolution();
    let sum: f64 = target
        .as_slice()
        .iter()
        .zip(density.as_slice())
        .map(|(&t, &d)| f64::from(t - d).powi(2))
        .sum();
    (sum / (n * n) as f64) as f32
}

impl SimulationState {
    /// Allocate the arenas and seed the initial state
    ///
    /// # Arguments
    ///
    /// * `config` - Validated before anything is allocated
    /// * `initial_density` - Smoke density at `t = 0`
    /// * `target` - Density the last step is compared against
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidConfig`] for a bad configuration, and
    /// [`SimError::DimensionMismatch`] or [`SimError::MalformedInput`] if
    /// either density field has the wrong resolution or non-finite values.
    pub fn new(
        config: SimulationConfig,
        initial_density: ScalarField2D,
        target: ScalarField2D,
    ) -> SimResult<Self> {
        config.validate()?;
        let n = config.resolution;
        check_input("initial density", &initial_density, n)?;
        check_input("target density", &target, n)?;

        let steps = config.steps;
        let sweeps = config.relaxation_sweeps;
        let (vx0, vy0) = config.initial_velocity.fields(n);

        let mut vx = TimeIndexedField::new("vx", steps, n);
        let mut vy = TimeIndexedField::new("vy", steps, n);
        let mut smoke = TimeIndexedField::new("smoke", steps, n);
        vx.set_initial(vx0);
        vy.set_initial(vy0);
        smoke.set_initial(initial_density);

        Ok(Self {
            vx,
            vy,
            smoke,
            vx_advected: TimeIndexedField::new("vx_advected", steps, n),
            vy_advected: TimeIndexedField::new("vy_advected", steps, n),
            divergence: TimeIndexedField::new("divergence", steps, n),
            pressure: IterationIndexedField::new("pressure", steps, sweeps, n),
            target,
            stats: None,
            config,
        })
    }

    /// Configuration this state was built with
    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Grid resolution
    #[must_use]
    pub fn resolution(&self) -> usize {
        self.config.resolution
    }

    /// Target density
    #[must_use]
    pub fn target(&self) -> &ScalarField2D {
        &self.target
    }

    /// Loss of the last completed forward pass
    #[must_use]
    pub fn loss(&self) -> Option<f32> {
        self.stats.map(|s| s.loss)
    }

    /// Diagnostics of the last completed forward pass
    #[must_use]
    pub fn stats(&self) -> Option<PassStats> {
        self.stats
    }

    /// Density after the last step of the last forward pass
    #[must_use]
    pub fn final_density(&self) -> &ScalarField2D {
        self.smoke.get(self.config.steps - 1)
    }

    /// `true` once a forward pass has completed and nothing has been mutated since
    #[must_use]
    pub fn has_trajectory(&self) -> bool {
        self.stats.is_some()
    }

    /// Current initial velocity `(vx[0], vy[0])`
    #[must_use]
    pub fn initial_velocity(&self) -> (&ScalarField2D, &ScalarField2D) {
        (self.vx.get(0), self.vy.get(0))
    }

    /// Replace the initial velocity
    ///
    /// # Errors
    ///
    /// Returns [`SimError::DimensionMismatch`] if either component has the
    /// wrong resolution.
    pub fn set_initial_velocity(&mut self, vx: ScalarField2D, vy: ScalarField2D) -> SimResult<()> {
        let n = self.config.resolution;
        for (name, field) in [("initial vx", &vx), ("initial vy", &vy)] {
            if field.resolution() != n {
                return Err(SimError::DimensionMismatch {
                    name: name.to_string(),
                    expected: n * n,
                    actual: field.as_slice().len(),
                });
            }
        }
        self.vx.set_initial(vx);
        self.vy.set_initial(vy);
        self.stats = None;
        Ok(())
    }

    /// Gradient-descent update of the initial velocity
    pub fn descend(&mut self, grad_vx: &ScalarField2D, grad_vy: &ScalarField2D, learning_rate: f32) {
        self.vx.initial_mut().add_scaled(grad_vx, -learning_rate);
        self.vy.initial_mut().add_scaled(grad_vy, -learning_rate);
        self.stats = None;
    }

    fn reset(&mut self) {
        self.vx.reset();
        self.vy.reset();
        self.smoke.reset();
        self.vx_advected.reset();
        self.vy_advected.reset();
        self.divergence.reset();
        self.pressure.reset();
        self.stats = None;
    }

    /// Advance one step `t >= 1` from the committed step `t - 1`
    fn step(&mut self, t: usize) -> SimResult<()> {
        let n = self.config.resolution;
        let dx = self.config.grid_spacing;
        let sweeps = self.config.relaxation_sweeps;

        let (vx_adv, vy_adv) = advect_velocity(self.vx.get(t - 1), self.vy.get(t - 1));
        ensure_finite(&vx_adv, Stage::VelocityAdvection, t, None)?;
        ensure_finite(&vy_adv, Stage::VelocityAdvection, t, None)?;

        let div = divergence(&vx_adv, &vy_adv, dx);
        ensure_finite(&div, Stage::Divergence, t, None)?;

        let initial_pressure = if self.config.warm_start_pressure && t > 1 {
            self.pressure.last(t - 1).clone()
        } else {
            ScalarField2D::new(n)
        };
        self.pressure.commit(t, 0, initial_pressure);
        for k in 0..sweeps {
            let next = relax_sweep(self.pressure.get(t, k), &div);
            ensure_finite(&next, Stage::Relaxation, t, Some(k))?;
            self.pressure.commit(t, k + 1, next);
        }

        let (vx, vy) = correct_velocity(&vx_adv, &vy_adv, self.pressure.last(t), dx);
        ensure_finite(&vx, Stage::Correction, t, None)?;
        ensure_finite(&vy, Stage::Correction, t, None)?;

        self.vx_advected.commit(t, vx_adv);
        self.vy_advected.commit(t, vy_adv);
        self.divergence.commit(t, div);
        self.vx.commit(t, vx);
        self.vy.commit(t, vy);

        let density = advect(self.smoke.get(t - 1), self.vx.get(t), self.vy.get(t));
        ensure_finite(&density, Stage::DensityAdvection, t, None)?;
        self.smoke.commit(t, density);
        Ok(())
    }

    /// Run a full forward pass and return the terminal loss
    ///
    /// Every derived slice is recomputed; only `vx[0]`, `vy[0]` and the initial
    /// density carry over from before the call.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::NonFinite`] naming the first stage that produced a
    /// NaN or infinity. The state then holds a partial trajectory and no loss.
    pub fn forward(&mut self, pass: PassKind, mut sink: Option<&mut dyn FrameSink>) -> SimResult<f32> {
        self.reset();
        let steps = self.config.steps;
        let dx = self.config.grid_spacing;
        let mut sink_time = Duration::ZERO;

        for t in 1..steps {
            self.step(t)?;
            if let Some(sink) = sink.as_mut() {
                let start = Instant::now();
                sink.on_frame(pass, t, self.smoke.get(t));
                sink_time += start.elapsed();
            }
        }

        let last = steps - 1;
        let loss = mean_squared_error(&self.target, self.smoke.get(last));
        if !loss.is_finite() {
            return Err(SimError::NonFinite {
                stage: Stage::Loss,
                step: last,
                sweep: None,
            });
        }

        let (divergence_before, divergence_after) = if last > 0 {
            let after = divergence(self.vx.get(last), self.vy.get(last), dx);
            (self.divergence.get(last).max_abs(), after.max_abs())
        } else {
            (0.0, 0.0)
        };
        let stats = PassStats {
            loss,
            divergence_before,
            divergence_after,
            mass: self.smoke.get(last).sum(),
            sink_time,
        };
        debug!(
            ?pass,
            loss = stats.loss,
            divergence_before = stats.divergence_before,
            divergence_after = stats.divergence_after,
            mass = stats.mass,
            "Forward pass complete"
        );
        self.stats = Some(stats);
        Ok(loss)
    }
}
