//! Gradient-descent outer loop
//!
//! Each iteration runs a forward pass, backpropagates the terminal loss and
//! steps the initial velocity against the gradient. Iterations are strictly
//! sequential because each forward pass starts from the previous update.
//!
//! A non-finite value anywhere in an iteration aborts it before the update, so
//! the initial velocity is left exactly as it was; the error is returned to
//! the caller without retrying.

use super::gradient::{backward, VelocityGradient};
use super::stepper::{FrameSink, PassKind, SimulationState};
use crate::config::SimulationConfig;
use crate::error::SimResult;
use crate::grid::ScalarField2D;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Progress record of one outer iteration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationReport {
    /// Zero-based iteration index
    pub iteration: usize,
    /// Loss of this iteration's forward pass (before the update)
    pub loss: f32,
    /// Norm of the gradient used for the update
    pub gradient_norm: f32,
    /// Wall time of forward + backward + update, excluding frame sinks
    pub elapsed: Duration,
}

/// Drives the simulator toward the target density
#[derive(Debug, Clone)]
pub struct Optimizer {
    state: SimulationState,
    learning_rate: f32,
    iterations: usize,
    completed: usize,
}

impl Optimizer {
    /// Build the simulation state and the optimizer
    ///
    /// # Errors
    ///
    /// Returns configuration and input errors from [`SimulationState::new`].
    pub fn new(
        config: SimulationConfig,
        initial_density: ScalarField2D,
        target: ScalarField2D,
    ) -> SimResult<Self> {
        let learning_rate = config.learning_rate;
        let iterations = config.iterations;
        let state = SimulationState::new(config, initial_density, target)?;
        Ok(Self {
            state,
            learning_rate,
            iterations,
            completed: 0,
        })
    }

    /// Simulation state, including the current initial velocity
    #[must_use]
    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    /// Mutable simulation state, e.g. to override the initial velocity
    pub fn state_mut(&mut self) -> &mut SimulationState {
        &mut self.state
    }

    /// Number of iterations completed so far
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Forward pass and gradient at the current initial velocity, no update
    ///
    /// # Errors
    ///
    /// Returns [`crate::SimError::NonFinite`] from either pass.
    pub fn evaluate(
        &mut self,
        pass: PassKind,
        sink: Option<&mut dyn FrameSink>,
    ) -> SimResult<(f32, VelocityGradient)> {
        let loss = self.state.forward(pass, sink)?;
        let gradient = backward(&self.state)?;
        Ok((loss, gradient))
    }

    /// Run one outer iteration: forward, backward, update
    ///
    /// The reported `elapsed` covers the kernels only; time spent inside
    /// `sink` is subtracted.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SimError::NonFinite`] if the forward or backward pass
    /// degenerates; the initial velocity is then unchanged.
    pub fn step(&mut self, sink: Option<&mut dyn FrameSink>) -> SimResult<IterationReport> {
        let iteration = self.completed;
        let start = Instant::now();

        let (loss, gradient) = self.evaluate(PassKind::Iteration(iteration), sink)?;
        let sink_time = self
            .state
            .stats()
            .map_or(Duration::ZERO, |stats| stats.sink_time);
        self.state
            .descend(&gradient.vx, &gradient.vy, self.learning_rate);
        self.completed += 1;

        Ok(IterationReport {
            iteration,
            loss,
            gradient_norm: gradient.norm(),
            elapsed: start.elapsed().saturating_sub(sink_time),
        })
    }

    /// Run all configured iterations
    ///
    /// `on_iteration` sees every report as it is produced; `sink` receives the
    /// density snapshots of every intermediate forward pass.
    ///
    /// # Errors
    ///
    /// Stops at the first failing iteration and returns its error.
    pub fn run(
        &mut self,
        mut on_iteration: impl FnMut(&IterationReport),
        mut sink: Option<&mut dyn FrameSink>,
    ) -> SimResult<Vec<IterationReport>> {
        let mut reports = Vec::with_capacity(self.iterations);
        while self.completed < self.iterations {
            let reborrowed = sink.as_mut().map(|s| &mut **s as &mut dyn FrameSink);
            let report = match self.step(reborrowed) {
                Ok(report) => report,
                Err(err) => {
                    warn!(iteration = self.completed, %err, "Aborting optimization");
                    return Err(err);
                }
            };
            info!(
                "Iter {} Loss = {:.6} |grad| = {:.3e} ({:.1} ms)",
                report.iteration,
                report.loss,
                report.gradient_norm,
                report.elapsed.as_secs_f64() * 1000.0
            );
            on_iteration(&report);
            reports.push(report);
        }
        Ok(reports)
    }

    /// Forward pass with the optimized initial velocity, snapshots tagged
    /// [`PassKind::Final`]
    ///
    /// # Errors
    ///
    /// Returns [`crate::SimError::NonFinite`] if the pass degenerates.
    pub fn final_pass(&mut self, sink: Option<&mut dyn FrameSink>) -> SimResult<f32> {
        let loss = self.state.forward(PassKind::Final, sink)?;
        info!("Final pass loss = {:.6}", loss);
        Ok(loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InitialVelocity;
    use crate::error::SimError;
    use crate::solver::FrameRecorder;

    fn disc(n: usize, center: (f32, f32)) -> ScalarField2D {
        ScalarField2D::from_fn(n, |r, c| {
            let dr = r as f32 - center.0;
            let dc = c as f32 - center.1;
            (-(dr * dr + dc * dc) / 3.0).exp()
        })
    }

    fn config(iterations: usize) -> SimulationConfig {
        SimulationConfig {
            iterations,
            steps: 4,
            relaxation_sweeps: 4,
            learning_rate: 1.0,
            initial_velocity: InitialVelocity::Zero,
            ..SimulationConfig::with_resolution(8)
        }
    }

    #[test]
    fn test_run_produces_one_report_per_iteration() {
        let mut opt = Optimizer::new(config(3), disc(8, (3.0, 3.0)), disc(8, (4.0, 3.0))).unwrap();
        let mut seen = Vec::new();
        let reports = opt.run(|r| seen.push(r.iteration), None).unwrap();
        assert_eq!(reports.len(), 3);
        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(opt.completed(), 3);
    }

    #[test]
    fn test_step_updates_initial_velocity() {
        let mut opt = Optimizer::new(config(1), disc(8, (3.0, 3.0)), disc(8, (4.0, 3.0))).unwrap();
        let before = opt.state().initial_velocity().0.clone();
        let report = opt.step(None).unwrap();
        assert!(report.loss > 0.0);
        assert!(report.gradient_norm > 0.0);
        assert_ne!(opt.state().initial_velocity().0, &before);
    }

    #[test]
    fn test_sink_sees_intermediate_and_final_passes() {
        let mut opt = Optimizer::new(config(2), disc(8, (3.0, 3.0)), disc(8, (4.0, 3.0))).unwrap();
        let mut recorder = FrameRecorder::default();
        opt.run(|_| {}, Some(&mut recorder)).unwrap();
        opt.final_pass(Some(&mut recorder)).unwrap();
        let passes: Vec<PassKind> = recorder.frames.iter().map(|f| f.0).collect();
        assert_eq!(passes.len(), 9);
        assert_eq!(passes[0], PassKind::Iteration(0));
        assert_eq!(passes[3], PassKind::Iteration(1));
        assert_eq!(passes[8], PassKind::Final);
    }

    #[test]
    fn test_closure_sink_reused_across_iterations() {
        let mut opt = Optimizer::new(config(4), disc(8, (3.0, 3.0)), disc(8, (4.0, 3.0))).unwrap();
        let mut seen = Vec::new();
        let mut sink = |pass: PassKind, step: usize, _: &ScalarField2D| seen.push((pass, step));
        let reports = opt.run(|_| {}, Some(&mut sink)).unwrap();
        assert_eq!(reports.len(), 4);
        assert_eq!(seen.len(), 12);
        assert_eq!(seen[11], (PassKind::Iteration(3), 3));
    }

    #[test]
    fn test_elapsed_excludes_sink_time() {
        let mut opt = Optimizer::new(config(1), disc(8, (3.0, 3.0)), disc(8, (4.0, 3.0))).unwrap();
        let mut slow_sink = |_: PassKind, _: usize, _: &ScalarField2D| {
            std::thread::sleep(Duration::from_millis(100));
        };
        let wall = Instant::now();
        let report = opt.step(Some(&mut slow_sink)).unwrap();
        // Three frames at 100 ms each
        assert!(wall.elapsed() >= Duration::from_millis(300));
        assert!(
            report.elapsed < Duration::from_millis(100),
            "elapsed {:?} includes sink time",
            report.elapsed
        );
    }

    #[test]
    fn test_nan_aborts_iteration_without_update() {
        let mut opt = Optimizer::new(config(2), disc(8, (3.0, 3.0)), disc(8, (4.0, 3.0))).unwrap();
        let mut vx = ScalarField2D::new(8);
        vx.set(5, 5, f32::INFINITY);
        opt.state_mut()
            .set_initial_velocity(vx.clone(), ScalarField2D::new(8))
            .unwrap();

        let err = opt.run(|_| {}, None).unwrap_err();
        assert!(err.is_numerical());
        assert!(matches!(err, SimError::NonFinite { step: 1, .. }));
        assert_eq!(opt.completed(), 0);
        // Bitwise comparison: INFINITY must still be there, nothing else touched
        let current = opt.state().initial_velocity().0;
        assert!(current
            .data
            .iter()
            .zip(&vx.data)
            .all(|(a, b)| a.to_bits() == b.to_bits()));
    }
}
