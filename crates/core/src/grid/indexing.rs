//! Toroidal index arithmetic
//!
//! Every neighbor lookup and every bilinear corner in the simulator is reduced
//! with floor-mod so the domain wraps: motion past one edge re-enters at the
//! opposite edge. Truncating `%` is wrong for negative operands, so all
//! wrapping goes through [`modulo`].

/// Floor-mod: result is always in `[0, divisor)`, including for negative `value`
///
/// # Panics
///
/// Debug builds panic if `divisor <= 0`.
#[inline]
#[must_use]
pub fn modulo(value: i64, divisor: i64) -> i64 {
    debug_assert!(divisor > 0, "modulo divisor must be positive");
    value.rem_euclid(divisor)
}

/// Wrap a signed cell coordinate into `[0, n)`
#[inline]
#[must_use]
pub fn wrap(value: i64, n: usize) -> usize {
    modulo(value, n as i64) as usize
}

/// Previous index with wraparound: `(i - 1 + n) mod n`
#[inline]
#[must_use]
pub fn dec_index(i: usize, n: usize) -> usize {
    if i % n == 0 {
        n - 1
    } else {
        i % n - 1
    }
}

/// Next index with wraparound: `(i + 1) mod n`
#[inline]
#[must_use]
pub fn inc_index(i: usize, n: usize) -> usize {
    (i % n + 1) % n
}
