//! Semi-Lagrangian advection on a periodic grid
//!
//! Each cell traces its origin backward along the velocity field and samples
//! the source field there with bilinear interpolation:
//!
//! ```text
//! cx = row - vx[row, col]        cy = col - vy[row, col]
//! left = ⌊cx⌋  top = ⌊cy⌋         rw = cx - left  bw = cy - top
//! out = (1-rw)((1-bw)·s[l,t] + bw·s[l,b]) + rw((1-bw)·s[r,t] + bw·s[r,b])
//! ```
//!
//! All four corners are wrapped independently with floor-mod. There is no
//! clamping: the domain is a torus.
//!
//! # Adjoint
//!
//! The sample is linear in the source field (corner weights) and piecewise
//! bilinear in the backtrace position. With `⌊·⌋` treated as locally constant:
//!
//! ```text
//! ∂out/∂cx = ((1-bw)·s[r,t] + bw·s[r,b]) - ((1-bw)·s[l,t] + bw·s[l,b])
//! ∂out/∂cy = (1-rw)(s[l,b] - s[l,t]) + rw(s[r,b] - s[r,t])
//! ```
//!
//! and `∂cx/∂vx = ∂cy/∂vy = -1`.

use crate::grid::{wrap, ScalarField2D};
use rayon::prelude::*;

/// Wrapped corner indices and fractional weights of one bilinear sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BilinearStencil {
    /// Row of the left corners
    pub left: usize,
    /// Row of the right corners
    pub right: usize,
    /// Column of the top corners
    pub top: usize,
    /// Column of the bottom corners
    pub bottom: usize,
    /// Weight of the right-hand corners
    pub rw: f32,
    /// Weight of the bottom corners
    pub bw: f32,
}

impl BilinearStencil {
    /// Stencil for the continuous position `(cx, cy)` on an n×n torus
    ///
    /// # Arguments
    ///
    /// * `cx` - Row coordinate in cell units, any real value
    /// * `cy` - Column coordinate in cell units, any real value
    /// * `n` - Grid resolution used to wrap the corners
    ///
    /// # Returns
    ///
    /// Wrapped corner indices with `rw`, `bw` in `[0, 1)` for finite input
    #[inline]
    #[must_use]
    pub fn at(cx: f32, cy: f32, n: usize) -> Self {
        let left_f = cx.floor();
        let top_f = cy.floor();
        // Saturating casts keep non-finite positions from panicking; the NaN
        // weights they produce are caught by the finite check downstream.
        let left = left_f as i64;
        let top = top_f as i64;
        Self {
            left: wrap(left, n),
            right: wrap(left.saturating_add(1), n),
            top: wrap(top, n),
            bottom: wrap(top.saturating_add(1), n),
            rw: cx - left_f,
            bw: cy - top_f,
        }
    }

    /// Backtrace from `(row, col)` against the local velocity
    ///
    /// # Arguments
    ///
    /// * `row`, `col` - Cell being updated
    /// * `vx`, `vy` - Velocity at that cell, in cells per step
    /// * `n` - Grid resolution
    #[inline]
    #[must_use]
    pub fn backtrace(row: usize, col: usize, vx: f32, vy: f32, n: usize) -> Self {
        Self::at(row as f32 - vx, col as f32 - vy, n)
    }

    /// `(row, col, weight)` for the four corners: lt, lb, rt, rb
    #[inline]
    #[must_use]
    pub fn corners(&self) -> [(usize, usize, f32); 4] {
        let (rw, bw) = (self.rw, self.bw);
        [
            (self.left, self.top, (1.0 - rw) * (1.0 - bw)),
            (self.left, self.bottom, (1.0 - rw) * bw),
            (self.right, self.top, rw * (1.0 - bw)),
            (self.right, self.bottom, rw * bw),
        ]
    }

    /// Bilinear blend of `src` at this stencil
    #[inline]
    #[must_use]
    pub fn sample(&self, src: &ScalarField2D) -> f32 {
        let (rw, bw) = (self.rw, self.bw);
        let lt = src.get(self.left, self.top);
        let lb = src.get(self.left, self.bottom);
        let rt = src.get(self.right, self.top);
        let rb = src.get(self.right, self.bottom);
        (1.0 - rw) * ((1.0 - bw) * lt + bw * lb) + rw * ((1.0 - bw) * rt + bw * rb)
    }

    /// `(∂sample/∂cx, ∂sample/∂cy)` of `src` at this stencil
    #[inline]
    #[must_use]
    pub fn position_gradient(&self, src: &ScalarField2D) -> (f32, f32) {
        let (rw, bw) = (self.rw, self.bw);
        let lt = src.get(self.left, self.top);
        let lb = src.get(self.left, self.bottom);
        let rt = src.get(self.right, self.top);
        let rb = src.get(self.right, self.bottom);
        let d_cx = ((1.0 - bw) * rt + bw * rb) - ((1.0 - bw) * lt + bw * lb);
        let d_cy = (1.0 - rw) * (lb - lt) + rw * (rb - rt);
        (d_cx, d_cy)
    }
}

/// Advect `src` along `(vx, vy)`
#[must_use]
pub fn advect(src: &ScalarField2D, vx: &ScalarField2D, vy: &ScalarField2D) -> ScalarField2D {
    let n = src.resolution();
    let mut out = ScalarField2D::new(n);
    out.par_update(|row, col, cell| {
        let stencil = BilinearStencil::backtrace(row, col, vx.get(row, col), vy.get(row, col), n);
        *cell = stencil.sample(src);
    });
    out
}

/// Self-advect a velocity field: both components are sampled along the same
/// backtrace, which uses the velocity itself
#[must_use]
pub fn advect_velocity(vx: &ScalarField2D, vy: &ScalarField2D) -> (ScalarField2D, ScalarField2D) {
    let n = vx.resolution();
    let mut vx_out = ScalarField2D::new(n);
    let mut vy_out = ScalarField2D::new(n);
    vx_out
        .as_mut_slice()
        .par_chunks_mut(n)
        .zip(vy_out.as_mut_slice().par_chunks_mut(n))
        .enumerate()
        .for_each(|(row, (out_x, out_y))| {
            for col in 0..n {
                let stencil =
                    BilinearStencil::backtrace(row, col, vx.get(row, col), vy.get(row, col), n);
                out_x[col] = stencil.sample(vx);
                out_y[col] = stencil.sample(vy);
            }
        });
    (vx_out, vy_out)
}

/// Adjoints produced by reversing one [`advect`] call
#[derive(Debug, Clone)]
pub struct AdvectionAdjoint {
    /// Adjoint of the advected source field
    pub source: ScalarField2D,
    /// Adjoint of the row velocity used for the backtrace
    pub velocity_x: ScalarField2D,
    /// Adjoint of the column velocity used for the backtrace
    pub velocity_y: ScalarField2D,
}

/// Reverse of [`advect`]: propagate `g_out` to the source and the velocity
#[must_use]
pub fn advect_adjoint(
    src: &ScalarField2D,
    vx: &ScalarField2D,
    vy: &ScalarField2D,
    g_out: &ScalarField2D,
) -> AdvectionAdjoint {
    let n = src.resolution();

    let mut velocity_x = ScalarField2D::new(n);
    let mut velocity_y = ScalarField2D::new(n);
    velocity_x
        .as_mut_slice()
        .par_chunks_mut(n)
        .zip(velocity_y.as_mut_slice().par_chunks_mut(n))
        .enumerate()
        .for_each(|(row, (gx, gy))| {
            for col in 0..n {
                let stencil =
                    BilinearStencil::backtrace(row, col, vx.get(row, col), vy.get(row, col), n);
                let (d_cx, d_cy) = stencil.position_gradient(src);
                let g = g_out.get(row, col);
                gx[col] = -d_cx * g;
                gy[col] = -d_cy * g;
            }
        });

    // Corners of different cells collide, so the scatter goes through
    // per-task accumulators merged at the end.
    let source = (0..n)
        .into_par_iter()
        .fold(
            || vec![0.0_f32; n * n],
            |mut acc, row| {
                for col in 0..n {
                    let stencil = BilinearStencil::backtrace(
                        row,
                        col,
                        vx.get(row, col),
                        vy.get(row, col),
                        n,
                    );
                    let g = g_out.get(row, col);
                    for (r, c, w) in stencil.corners() {
                        acc[r * n + c] += w * g;
                    }
                }
                acc
            },
        )
        .reduce(
            || vec![0.0_f32; n * n],
            |mut a, b| {
                for (x, y) in a.iter_mut().zip(b) {
                    *x += y;
                }
                a
            },
        );

    AdvectionAdjoint {
        source: ScalarField2D::from_raw(n, source),
        velocity_x,
        velocity_y,
    }
}

/// Reverse of [`advect_velocity`]: adjoints of the previous `(vx, vy)` given
/// the adjoints of the advected components
#[must_use]
pub fn advect_velocity_adjoint(
    vx: &ScalarField2D,
    vy: &ScalarField2D,
    g_vx_out: &ScalarField2D,
    g_vy_out: &ScalarField2D,
) -> (ScalarField2D, ScalarField2D) {
    let through_x = advect_adjoint(vx, vx, vy, g_vx_out);
    let through_y = advect_adjoint(vy, vx, vy, g_vy_out);

    let mut g_vx = through_x.source;
    g_vx.add_assign(&through_x.velocity_x);
    g_vx.add_assign(&through_y.velocity_x);

    let mut g_vy = through_y.source;
    g_vy.add_assign(&through_x.velocity_y);
    g_vy.add_assign(&through_y.velocity_y);

    (g_vx, g_vy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(n: usize) -> ScalarField2D {
        ScalarField2D::from_fn(n, |r, c| (r * n + c) as f32)
    }

    fn smooth(n: usize, phase: f32) -> ScalarField2D {
        let k = std::f32::consts::TAU / n as f32;
        ScalarField2D::from_fn(n, |r, c| {
            (k * r as f32 + phase).sin() + 0.5 * (k * c as f32 - phase).cos()
        })
    }

    #[test]
    fn test_sample_at_grid_point_is_exact() {
        let src = ramp(5);
        for r in 0..5 {
            for c in 0..5 {
                let s = BilinearStencil::at(r as f32, c as f32, 5);
                assert_eq!(s.rw, 0.0);
                assert_eq!(s.bw, 0.0);
                assert_eq!(s.sample(&src), src.get(r, c));
            }
        }
    }

    #[test]
    fn test_sample_wraps_negative_positions() {
        let src = ramp(4);
        let s = BilinearStencil::at(-1.0, -1.0, 4);
        assert_eq!((s.left, s.top), (3, 3));
        assert_eq!((s.right, s.bottom), (0, 0));
        assert_eq!(s.sample(&src), src.get(3, 3));
    }

    #[test]
    fn test_sample_midpoint_blends_corners() {
        let src = ramp(4);
        // Between (3,3)=15, (3,0)=12, (0,3)=3, (0,0)=0
        let s = BilinearStencil::at(3.5, 3.5, 4);
        assert_relative_eq!(s.sample(&src), (15.0 + 12.0 + 3.0 + 0.0) / 4.0);
    }

    #[test]
    fn test_corner_weights_sum_to_one() {
        let s = BilinearStencil::at(2.3, -0.6, 7);
        let total: f32 = s.corners().iter().map(|c| c.2).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_zero_velocity_is_identity() {
        let src = smooth(6, 0.3);
        let zero = ScalarField2D::new(6);
        assert_eq!(advect(&src, &zero, &zero), src);
    }

    #[test]
    fn test_unit_velocity_shifts_one_row() {
        let src = ramp(4);
        let vx = ScalarField2D::with_value(4, 1.0);
        let vy = ScalarField2D::new(4);
        let out = advect(&src, &vx, &vy);
        for r in 0..4 {
            for c in 0..4 {
                assert_eq!(out.get(r, c), src.get((r + 3) % 4, c));
            }
        }
    }

    #[test]
    fn test_position_gradient_matches_finite_difference() {
        let src = smooth(8, 0.7);
        let (cx, cy) = (3.3_f32, 5.6_f32);
        let s = BilinearStencil::at(cx, cy, 8);
        let (d_cx, d_cy) = s.position_gradient(&src);
        let h = 1e-2;
        let fd_cx = (BilinearStencil::at(cx + h, cy, 8).sample(&src)
            - BilinearStencil::at(cx - h, cy, 8).sample(&src))
            / (2.0 * h);
        let fd_cy = (BilinearStencil::at(cx, cy + h, 8).sample(&src)
            - BilinearStencil::at(cx, cy - h, 8).sample(&src))
            / (2.0 * h);
        assert_relative_eq!(d_cx, fd_cx, epsilon = 1e-3);
        assert_relative_eq!(d_cy, fd_cy, epsilon = 1e-3);
    }

    #[test]
    fn test_adjoint_dot_product_identity() {
        // <advect(src), g> == <src, advect_adjoint(g).source> for fixed velocity
        let n = 6;
        let src = smooth(n, 0.2);
        let g = smooth(n, 1.1);
        let vx = ScalarField2D::from_fn(n, |r, c| 0.3 + 0.1 * (r + c) as f32);
        let vy = ScalarField2D::from_fn(n, |r, _| -0.4 + 0.05 * r as f32);

        let forward = advect(&src, &vx, &vy);
        let lhs: f32 = forward.data.iter().zip(&g.data).map(|(a, b)| a * b).sum();
        let adj = advect_adjoint(&src, &vx, &vy, &g);
        let rhs: f32 = src.data.iter().zip(&adj.source.data).map(|(a, b)| a * b).sum();
        assert_relative_eq!(lhs, rhs, epsilon = 1e-3);
    }

    #[test]
    fn test_nan_velocity_propagates_without_panic() {
        let src = ramp(4);
        let mut vx = ScalarField2D::new(4);
        vx.set(1, 1, f32::NAN);
        let vy = ScalarField2D::with_value(4, f32::INFINITY);
        let out = advect(&src, &vx, &vy);
        assert!(!out.is_finite());
    }
}
