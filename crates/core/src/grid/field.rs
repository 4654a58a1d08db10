//! Dense square scalar fields
//!
//! Stores 2D field data as a flat `Vec<f32>` in row-major order
//! (`row * n + col`). Rows are the first spatial axis (`y`), columns the second
//! (`x`). Neighbor access wraps toroidally.

use super::indexing::{dec_index, inc_index};
use crate::error::{SimError, SimResult};
use rayon::prelude::*;

/// Field data container for one n×n grid
///
/// The buffer always holds exactly `n * n` cells. Callers read and write
/// cells through [`as_slice`](Self::as_slice) and
/// [`as_mut_slice`](Self::as_mut_slice), which cannot change its length:
///
/// ```compile_fail
/// let mut field = smoke_design_core::ScalarField2D::new(4);
/// field.data.push(1.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarField2D {
    /// Field values in row-major order (row * n + col)
    pub(crate) data: Vec<f32>,
    /// Grid resolution (cells per side)
    n: usize,
}

impl ScalarField2D {
    /// Create a new field initialized to zero
    ///
    /// # Arguments
    ///
    /// * `n` - Grid resolution (cells per side)
    ///
    /// # Returns
    ///
    /// New n×n field initialized to all zeros
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self {
            data: vec![0.0; n * n],
            n,
        }
    }

    /// Create a new field with every cell set to `value`
    ///
    /// # Arguments
    ///
    /// * `n` - Grid resolution (cells per side)
    /// * `value` - Initial value for all cells
    ///
    /// # Returns
    ///
    /// New n×n field initialized to the specified value
    #[must_use]
    pub fn with_value(n: usize, value: f32) -> Self {
        Self {
            data: vec![value; n * n],
            n,
        }
    }

    /// Build a field by evaluating `f(row, col)` at every cell
    ///
    /// # Arguments
    ///
    /// * `n` - Grid resolution (cells per side)
    /// * `f` - Value of the cell at `(row, col)`, both in `0..n`
    ///
    /// # Returns
    ///
    /// New n×n field filled in row-major order
    #[must_use]
    pub fn from_fn(n: usize, f: impl Fn(usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(n * n);
        for row in 0..n {
            for col in 0..n {
                data.push(f(row, col));
            }
        }
        Self { data, n }
    }

    /// Wrap an existing row-major buffer
    ///
    /// # Arguments
    ///
    /// * `name` - Input name used in the error message
    /// * `n` - Grid resolution (cells per side)
    /// * `data` - Cell values in row-major order (`row * n + col`)
    ///
    /// # Errors
    ///
    /// Returns [`SimError::DimensionMismatch`] if `data.len() != n * n`.
    pub fn from_vec(name: &str, n: usize, data: Vec<f32>) -> SimResult<Self> {
        if data.len() != n * n {
            return Err(SimError::DimensionMismatch {
                name: name.to_string(),
                expected: n * n,
                actual: data.len(),
            });
        }
        Ok(Self { data, n })
    }

    /// Wrap a buffer whose length is already known to be `n * n`
    pub(crate) fn from_raw(n: usize, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), n * n);
        Self { data, n }
    }

    /// Grid resolution
    #[must_use]
    pub fn resolution(&self) -> usize {
        self.n
    }

    /// Get reference to field data
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Get mutable reference to field data
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Value at `(row, col)`
    ///
    /// # Arguments
    ///
    /// * `row` - Row index (0 to n-1)
    /// * `col` - Column index (0 to n-1)
    ///
    /// # Returns
    ///
    /// Field value at the given cell
    ///
    /// # Panics
    ///
    /// Panics if coordinates are out of bounds
    #[inline]
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        assert!(row < self.n && col < self.n, "Coordinates out of bounds");
        self.data[row * self.n + col]
    }

    /// Set value at `(row, col)`
    ///
    /// # Panics
    ///
    /// Panics if coordinates are out of bounds
    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        assert!(row < self.n && col < self.n, "Coordinates out of bounds");
        self.data[row * self.n + col] = value;
    }

    /// Sum of the four periodic neighbors of `(row, col)`
    #[inline]
    #[must_use]
    pub fn neighbor_sum(&self, row: usize, col: usize) -> f32 {
        let n = self.n;
        self.data[dec_index(row, n) * n + col]
            + self.data[inc_index(row, n) * n + col]
            + self.data[row * n + dec_index(col, n)]
            + self.data[row * n + inc_index(col, n)]
    }

    /// Central difference along rows: `f[row+1, col] - f[row-1, col]`
    #[inline]
    #[must_use]
    pub fn row_difference(&self, row: usize, col: usize) -> f32 {
        let n = self.n;
        self.data[inc_index(row, n) * n + col] - self.data[dec_index(row, n) * n + col]
    }

    /// Central difference along columns: `f[row, col+1] - f[row, col-1]`
    #[inline]
    #[must_use]
    pub fn col_difference(&self, row: usize, col: usize) -> f32 {
        let n = self.n;
        self.data[row * n + inc_index(col, n)] - self.data[row * n + dec_index(col, n)]
    }

    /// Fill entire field with a value
    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    /// Add `other` into this field cell by cell
    pub fn add_assign(&mut self, other: &Self) {
        self.add_scaled(other, 1.0);
    }

    /// `self += scale * other`, cell by cell
    pub fn add_scaled(&mut self, other: &Self, scale: f32) {
        debug_assert_eq!(self.n, other.n);
        self.data
            .par_iter_mut()
            .zip(other.data.par_iter())
            .for_each(|(a, &b)| *a += scale * b);
    }

    /// Sum of all cells
    #[must_use]
    pub fn sum(&self) -> f32 {
        self.data.iter().sum()
    }

    /// Largest absolute value
    #[must_use]
    pub fn max_abs(&self) -> f32 {
        self.data.iter().fold(0.0_f32, |m, v| m.max(v.abs()))
    }

    /// Euclidean norm
    #[must_use]
    pub fn l2_norm(&self) -> f32 {
        self.data.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// `true` if every cell is finite
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.data.par_iter().all(|v| v.is_finite())
    }

    /// Apply `f(row, col, cell)` to every cell, rows in parallel
    pub fn par_update(&mut self, f: impl Fn(usize, usize, &mut f32) + Sync + Send) {
        let n = self.n;
        self.data
            .par_chunks_mut(n)
            .enumerate()
            .for_each(|(row, cells)| {
                for (col, cell) in cells.iter_mut().enumerate() {
                    f(row, col, cell);
                }
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_creation() {
        let field = ScalarField2D::new(10);
        assert_eq!(field.resolution(), 10);
        assert_eq!(field.data.len(), 100);
        assert!(field.data.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_field_get_set_row_major() {
        let mut field = ScalarField2D::new(10);
        field.set(4, 3, 123.45);
        assert_eq!(field.get(4, 3), 123.45);
        assert_eq!(field.data[4 * 10 + 3], 123.45);
    }

    #[test]
    fn test_from_vec_rejects_wrong_length() {
        let err = ScalarField2D::from_vec("target", 4, vec![0.0; 15]).unwrap_err();
        assert!(matches!(
            err,
            SimError::DimensionMismatch {
                expected: 16,
                actual: 15,
                ..
            }
        ));
    }

    #[test]
    fn test_mut_slice_keeps_cell_count() {
        let mut field = ScalarField2D::from_vec("vx", 3, vec![1.0; 9]).unwrap();
        field.as_mut_slice()[8] = 4.0;
        assert_eq!(field.as_slice().len(), 9);
        assert_eq!(field.get(2, 2), 4.0);
    }

    #[test]
    fn test_neighbor_sum_wraps() {
        let field = ScalarField2D::from_fn(3, |r, c| (r * 3 + c) as f32);
        // Neighbors of (0,0): (2,0)=6, (1,0)=3, (0,2)=2, (0,1)=1
        assert_eq!(field.neighbor_sum(0, 0), 12.0);
    }

    #[test]
    fn test_central_differences_wrap() {
        let field = ScalarField2D::from_fn(4, |r, c| (r * 10 + c) as f32);
        assert_eq!(field.row_difference(0, 1), 11.0 - 31.0);
        assert_eq!(field.col_difference(2, 3), 20.0 - 22.0);
    }

    #[test]
    fn test_add_scaled() {
        let mut a = ScalarField2D::with_value(3, 1.0);
        let b = ScalarField2D::with_value(3, 2.0);
        a.add_scaled(&b, -0.25);
        assert!(a.data.iter().all(|&v| v == 0.5));
        a.add_assign(&b);
        assert!(a.data.iter().all(|&v| v == 2.5));
    }

    #[test]
    fn test_is_finite_detects_nan() {
        let mut field = ScalarField2D::with_value(4, 1.0);
        assert!(field.is_finite());
        field.set(2, 2, f32::NAN);
        assert!(!field.is_finite());
    }

    #[test]
    fn test_par_update_visits_every_cell() {
        let mut field = ScalarField2D::new(5);
        field.par_update(|r, c, v| *v = (r * 5 + c) as f32);
        assert_eq!(field.get(4, 4), 24.0);
        assert_eq!(field.sum(), (0..25).sum::<i32>() as f32);
    }

    #[test]
    #[should_panic(expected = "Coordinates out of bounds")]
    fn test_field_bounds_check() {
        let field = ScalarField2D::new(10);
        let _ = field.get(10, 5);
    }
}
