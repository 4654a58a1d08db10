//! Reverse-mode gradient of the terminal loss w.r.t. the initial velocity
//!
//! The forward arenas are the tape: every operator input is still available,
//! so each kernel is reversed with its closed-form adjoint, walking the steps
//! from last to first. Adjoint fields are rolled step by step and start from
//! zero on every call, so nothing accumulates across outer iterations.
//!
//! Per step `t`, in reverse order of the forward pass:
//!
//! ```text
//! density advection   g_smoke[t]          → g_smoke[t-1], g_vx[t], g_vy[t]
//! correction          g_vx[t], g_vy[t]    → g_vxU, g_vyU, g_p[K]
//! K sweeps            g_p[k+1]            → g_p[k], g_div += g_p[k+1] / 4
//! divergence          g_div               → g_vxU, g_vyU
//! velocity advection  g_vxU, g_vyU        → g_vx[t-1], g_vy[t-1]
//! ```
//!
//! With warm-started pressure, `g_p[0]` of step `t` flows into `g_p[K]` of
//! step `t - 1`.

use super::advection::{advect_adjoint, advect_velocity_adjoint};
use super::projection::{correct_velocity_adjoint, divergence_adjoint, relax_sweep_adjoint};
use super::stepper::{ensure_finite, SimulationState};
use crate::error::{SimResult, Stage};
use crate::grid::ScalarField2D;

/// ∂loss/∂vx[0] and ∂loss/∂vy[0]
#[derive(Debug, Clone, PartialEq)]
pub struct VelocityGradient {
    /// Gradient w.r.t. the initial row velocity
    pub vx: ScalarField2D,
    /// Gradient w.r.t. the initial column velocity
    pub vy: ScalarField2D,
}

impl VelocityGradient {
    /// Combined Euclidean norm of both components
    #[must_use]
    pub fn norm(&self) -> f32 {
        self.vx.l2_norm().hypot(self.vy.l2_norm())
    }
}

/// Adjoint of the loss w.r.t. the final density
fn loss_adjoint(target: &ScalarField2D, density: &ScalarField2D) -> ScalarField2D {
    let n = target.resolution();
    let scale = -2.0 / (n * n) as f32;
    let mut g = ScalarField2D::new(n);
    g.par_update(|row, col, cell| {
        *cell = scale * (target.get(row, col) - density.get(row, col));
    });
    g
}

/// Backpropagate the loss of the last forward pass to the initial velocity
///
/// # Errors
///
/// Returns [`crate::SimError::NonFinite`] with [`Stage::Gradient`] if an
/// adjoint becomes NaN or infinite.
///
/// # Panics
///
/// Panics if `state` holds no completed forward pass.
pub fn backward(state: &SimulationState) -> SimResult<VelocityGradient> {
    assert!(
        state.has_trajectory(),
        "backward called without a completed forward pass"
    );
    let config = state.config();
    let n = config.resolution;
    let steps = config.steps;
    let sweeps = config.relaxation_sweeps;
    let dx = config.grid_spacing;
    let warm_start = config.warm_start_pressure;

    let mut g_smoke = loss_adjoint(state.target(), state.smoke.get(steps - 1));
    let mut g_vx = ScalarField2D::new(n);
    let mut g_vy = ScalarField2D::new(n);
    let mut g_pressure_carry: Option<ScalarField2D> = None;

    for t in (1..steps).rev() {
        // Density advection used the corrected step-t velocity
        let density = advect_adjoint(
            state.smoke.get(t - 1),
            state.vx.get(t),
            state.vy.get(t),
            &g_smoke,
        );
        g_vx.add_assign(&density.velocity_x);
        g_vy.add_assign(&density.velocity_y);

        // Velocity correction
        let mut g_p = correct_velocity_adjoint(&g_vx, &g_vy, dx);
        if let Some(carry) = g_pressure_carry.take() {
            g_p.add_assign(&carry);
        }
        let mut g_vx_adv = g_vx;
        let mut g_vy_adv = g_vy;

        // Relaxation sweeps, last to first
        let mut g_div = ScalarField2D::new(n);
        for k in (0..sweeps).rev() {
            g_div.add_scaled(&g_p, 0.25);
            g_p = relax_sweep_adjoint(&g_p);
            ensure_finite(&g_p, Stage::Gradient, t, Some(k))?;
        }
        if warm_start && t > 1 {
            g_pressure_carry = Some(g_p);
        }

        // Divergence of the advected velocity
        let (div_x, div_y) = divergence_adjoint(&g_div, dx);
        g_vx_adv.add_assign(&div_x);
        g_vy_adv.add_assign(&div_y);

        // Self-advection from step t-1
        let (prev_x, prev_y) = advect_velocity_adjoint(
            state.vx.get(t - 1),
            state.vy.get(t - 1),
            &g_vx_adv,
            &g_vy_adv,
        );
        ensure_finite(&prev_x, Stage::Gradient, t - 1, None)?;
        ensure_finite(&prev_y, Stage::Gradient, t - 1, None)?;
        g_vx = prev_x;
        g_vy = prev_y;
        g_smoke = density.source;
    }

    Ok(VelocityGradient { vx: g_vx, vy: g_vy })
}
