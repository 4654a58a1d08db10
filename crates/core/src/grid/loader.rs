//! Density grid loading from plain text
//!
//! Image decoding and resampling happen outside this crate. The collaborator
//! hands over an n×n density array already normalized to `[0, 1]`, serialized
//! as `n` lines of `n` whitespace-separated floats. Blank lines and lines
//! starting with `#` are ignored.
//!
//! Any deviation (ragged rows, unparsable tokens, values outside `[0, 1]`,
//! wrong resolution) is an input error reported before the simulation runs.

use super::field::ScalarField2D;
use crate::error::{SimError, SimResult};
use std::path::Path;

/// Parse an n×n density grid from text
///
/// # Errors
///
/// Returns [`SimError::MalformedInput`] for bad tokens, ragged rows or values
/// outside `[0, 1]`, and [`SimError::DimensionMismatch`] if the grid is not
/// `n` rows of `n` values.
pub fn parse_density(name: &str, text: &str, n: usize) -> SimResult<ScalarField2D> {
    let mut data = Vec::with_capacity(n * n);
    let mut rows = 0;

    for (line_idx, line) in text.lines().enumerate() {
        let line_no = line_idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let malformed = |reason: String| SimError::MalformedInput {
            name: name.to_string(),
            line: line_no,
            reason,
        };

        let before = data.len();
        for token in trimmed.split_whitespace() {
            let value: f32 = token
                .parse()
                .map_err(|_| malformed(format!("cannot parse '{token}' as a number")))?;
            if !value.is_finite() {
                return Err(malformed(format!("non-finite value '{token}'")));
            }
            if !(0.0..=1.0).contains(&value) {
                return Err(malformed(format!("density {value} outside [0, 1]")));
            }
            data.push(value);
        }

        let width = data.len() - before;
        if width != n {
            return Err(malformed(format!("expected {n} values per row, got {width}")));
        }
        rows += 1;
    }

    if rows != n {
        return Err(SimError::DimensionMismatch {
            name: name.to_string(),
            expected: n * n,
            actual: data.len(),
        });
    }

    ScalarField2D::from_vec(name, n, data)
}

/// Read and parse a density grid file
///
/// # Errors
///
/// Returns [`SimError::Io`] if the file cannot be read, otherwise the errors of
/// [`parse_density`].
pub fn load_density(path: &Path, n: usize) -> SimResult<ScalarField2D> {
    let text = std::fs::read_to_string(path)?;
    parse_density(&path.display().to_string(), &text, n)
}

/// Serialize a field in the format accepted by [`parse_density`]
#[must_use]
pub fn format_density(field: &ScalarField2D) -> String {
    let n = field.resolution();
    let mut out = String::new();
    for row in field.as_slice().chunks(n) {
        let line: Vec<String> = row.iter().map(ToString::to_string).collect();
        out.push_str(&line.join(" "));
        out.push('\n');
    }
    out
}
