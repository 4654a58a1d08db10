//! Pressure projection on a periodic grid
//!
//! Removes the divergent part of the advected velocity in three kernels:
//!
//! ```text
//! div[y,x]  = -0.5·dx·((vxU[y+1,x] - vxU[y-1,x]) + (vyU[y,x+1] - vyU[y,x-1]))
//! p'[y,x]   = (div[y,x] + p[y-1,x] + p[y+1,x] + p[y,x-1] + p[y,x+1]) / 4
//! vx[y,x]   = vxU[y,x] - 0.5·(p[y+1,x] - p[y-1,x]) / dx
//! vy[y,x]   = vyU[y,x] - 0.5·(p[y,x+1] - p[y,x-1]) / dx
//! ```
//!
//! The relaxation runs a fixed number of Jacobi sweeps. Each sweep reads only
//! the previous sweep's grid, so every sweep is a pure function of its input
//! and can be reversed exactly.
//!
//! All adjoints are written in gather form: every output cell reads its
//! neighbors' incoming adjoints, so they parallelize like the forward kernels.

use crate::grid::ScalarField2D;
use rayon::prelude::*;

/// Discrete divergence (scaled by `-0.5·dx`) of the advected velocity
#[must_use]
pub fn divergence(vx_adv: &ScalarField2D, vy_adv: &ScalarField2D, dx: f32) -> ScalarField2D {
    let mut div = ScalarField2D::new(vx_adv.resolution());
    div.par_update(|row, col, cell| {
        *cell = -0.5 * dx * (vx_adv.row_difference(row, col) + vy_adv.col_difference(row, col));
    });
    div
}

/// One Jacobi sweep of the pressure Poisson equation
#[must_use]
pub fn relax_sweep(pressure: &ScalarField2D, div: &ScalarField2D) -> ScalarField2D {
    let mut next = ScalarField2D::new(pressure.resolution());
    next.par_update(|row, col, cell| {
        *cell = (div.get(row, col) + pressure.neighbor_sum(row, col)) / 4.0;
    });
    next
}

/// Subtract the pressure gradient from the advected velocity
#[must_use]
pub fn correct_velocity(
    vx_adv: &ScalarField2D,
    vy_adv: &ScalarField2D,
    pressure: &ScalarField2D,
    dx: f32,
) -> (ScalarField2D, ScalarField2D) {
    let n = vx_adv.resolution();
    let mut vx = ScalarField2D::new(n);
    let mut vy = ScalarField2D::new(n);
    vx.as_mut_slice()
        .par_chunks_mut(n)
        .zip(vy.as_mut_slice().par_chunks_mut(n))
        .enumerate()
        .for_each(|(row, (out_x, out_y))| {
            for col in 0..n {
                out_x[col] = vx_adv.get(row, col) - 0.5 * pressure.row_difference(row, col) / dx;
                out_y[col] = vy_adv.get(row, col) - 0.5 * pressure.col_difference(row, col) / dx;
            }
        });
    (vx, vy)
}

/// Reverse of [`divergence`]: `(g_vx_adv, g_vy_adv)` from `g_div`
#[must_use]
pub fn divergence_adjoint(g_div: &ScalarField2D, dx: f32) -> (ScalarField2D, ScalarField2D) {
    let n = g_div.resolution();
    let mut g_vx = ScalarField2D::new(n);
    let mut g_vy = ScalarField2D::new(n);
    g_vx.par_update(|row, col, cell| *cell = 0.5 * dx * g_div.row_difference(row, col));
    g_vy.par_update(|row, col, cell| *cell = 0.5 * dx * g_div.col_difference(row, col));
    (g_vx, g_vy)
}

/// Reverse of [`relax_sweep`] w.r.t. the input pressure
///
/// The divergence receives `g_next / 4` from every sweep; callers accumulate
/// that term themselves.
#[must_use]
pub fn relax_sweep_adjoint(g_next: &ScalarField2D) -> ScalarField2D {
    let mut g_prev = ScalarField2D::new(g_next.resolution());
    g_prev.par_update(|row, col, cell| *cell = g_next.neighbor_sum(row, col) / 4.0);
    g_prev
}

/// Reverse of [`correct_velocity`] w.r.t. the pressure
///
/// The advected velocity receives the corrected velocity's adjoint unchanged.
#[must_use]
pub fn correct_velocity_adjoint(
    g_vx: &ScalarField2D,
    g_vy: &ScalarField2D,
    dx: f32,
) -> ScalarField2D {
    let mut g_p = ScalarField2D::new(g_vx.resolution());
    g_p.par_update(|row, col, cell| {
        *cell = 0.5 * (g_vx.row_difference(row, col) + g_vy.col_difference(row, col)) / dx;
    });
    g_p
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::TAU;

    fn dot(a: &ScalarField2D, b: &ScalarField2D) -> f32 {
        a.data.iter().zip(&b.data).map(|(x, y)| x * y).sum()
    }

    fn wave(n: usize, fr: f32, fc: f32, phase: f32) -> ScalarField2D {
        let k = TAU / n as f32;
        ScalarField2D::from_fn(n, |r, c| (k * (fr * r as f32 + fc * c as f32) + phase).sin())
    }

    #[test]
    fn test_uniform_field_is_divergence_free() {
        let vx = ScalarField2D::with_value(4, 1.0);
        let vy = ScalarField2D::with_value(4, -0.3);
        assert_eq!(divergence(&vx, &vy, 0.25).max_abs(), 0.0);
    }

    #[test]
    fn test_sweep_of_zero_is_quarter_divergence() {
        let div = wave(6, 1.0, 0.0, 0.0);
        let p = relax_sweep(&ScalarField2D::new(6), &div);
        for (a, b) in p.data.iter().zip(&div.data) {
            assert_relative_eq!(*a, b / 4.0);
        }
    }

    #[test]
    fn test_projection_reduces_divergence() {
        let n = 16;
        let dx = 1.0 / n as f32;
        let vx_adv = wave(n, 1.0, 0.0, 0.0);
        let mut vy_adv = wave(n, 0.0, 1.0, 0.5);
        vy_adv.data.iter_mut().for_each(|v| *v *= 0.5);

        let div = divergence(&vx_adv, &vy_adv, dx);
        let mut p = ScalarField2D::new(n);
        for _ in 0..300 {
            p = relax_sweep(&p, &div);
        }
        let (vx, vy) = correct_velocity(&vx_adv, &vy_adv, &p, dx);

        let before = div.l2_norm();
        let after = divergence(&vx, &vy, dx).l2_norm();
        assert!(before > 1e-3);
        assert!(after < 0.2 * before, "before {before}, after {after}");
    }

    #[test]
    fn test_divergence_adjoint_dot_product() {
        let n = 5;
        let dx = 0.2;
        let vx = wave(n, 1.0, 2.0, 0.1);
        let vy = wave(n, 2.0, 1.0, 0.7);
        let g = wave(n, 1.0, 1.0, 1.3);
        let lhs = dot(&divergence(&vx, &vy, dx), &g);
        let (gx, gy) = divergence_adjoint(&g, dx);
        let rhs = dot(&vx, &gx) + dot(&vy, &gy);
        assert_relative_eq!(lhs, rhs, epsilon = 1e-4);
    }

    #[test]
    fn test_sweep_adjoint_dot_product() {
        let n = 5;
        let p = wave(n, 1.0, 2.0, 0.4);
        let g = wave(n, 2.0, 1.0, 0.9);
        let zero = ScalarField2D::new(n);
        let lhs = dot(&relax_sweep(&p, &zero), &g);
        let rhs = dot(&p, &relax_sweep_adjoint(&g));
        assert_relative_eq!(lhs, rhs, epsilon = 1e-4);
    }

    #[test]
    fn test_correction_adjoint_dot_product() {
        let n = 6;
        let dx = 1.0 / 6.0;
        let p = wave(n, 1.0, 1.0, 0.2);
        let gx = wave(n, 2.0, 1.0, 0.5);
        let gy = wave(n, 1.0, 3.0, 1.5);
        let zero = ScalarField2D::new(n);
        let (vx, vy) = correct_velocity(&zero, &zero, &p, dx);
        let lhs = dot(&vx, &gx) + dot(&vy, &gy);
        let rhs = dot(&p, &correct_velocity_adjoint(&gx, &gy, dx));
        assert_relative_eq!(lhs, rhs, epsilon = 1e-3);
    }
}
