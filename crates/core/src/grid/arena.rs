//! Write-once field arenas indexed by step and sweep
//!
//! The backward pass replays every intermediate value of the forward pass, so
//! no slice may be overwritten in place. Each arena slot is written exactly
//! once per forward pass; [`TimeIndexedField::reset`] clears everything except
//! the externally owned `t = 0` slice before the next pass.
//!
//! Reading an unwritten slot, writing a slot twice, or addressing a step or
//! sweep outside the declared range are programming errors and panic.

use super::field::ScalarField2D;

/// One field per simulated step
#[derive(Debug, Clone)]
pub struct TimeIndexedField {
    name: &'static str,
    n: usize,
    slices: Vec<Option<ScalarField2D>>,
}

impl TimeIndexedField {
    /// Create an arena of `steps` empty slots for an n×n field
    #[must_use]
    pub fn new(name: &'static str, steps: usize, n: usize) -> Self {
        Self {
            name,
            n,
            slices: vec![None; steps],
        }
    }

    /// Number of step slots
    #[must_use]
    pub fn steps(&self) -> usize {
        self.slices.len()
    }

    /// Grid resolution
    #[must_use]
    pub fn resolution(&self) -> usize {
        self.n
    }

    /// Drop every slice except `t = 0`
    pub fn reset(&mut self) {
        for slot in self.slices.iter_mut().skip(1) {
            *slot = None;
        }
    }

    /// `true` if step `t` has been written this pass
    #[must_use]
    pub fn is_written(&self, t: usize) -> bool {
        self.slices.get(t).is_some_and(Option::is_some)
    }

    /// Write step `t`
    ///
    /// # Panics
    ///
    /// Panics if `t` is out of range, the slot is already written, or the field
    /// resolution differs from the arena's.
    pub fn commit(&mut self, t: usize, field: ScalarField2D) {
        assert_eq!(
            field.resolution(),
            self.n,
            "{}: resolution mismatch at step {t}",
            self.name
        );
        let steps = self.slices.len();
        let slot = self
            .slices
            .get_mut(t)
            .unwrap_or_else(|| panic!("{}: step {t} out of range 0..{steps}", self.name));
        assert!(slot.is_none(), "{}: step {t} written twice", self.name);
        *slot = Some(field);
    }

    /// Read step `t`
    ///
    /// # Panics
    ///
    /// Panics if `t` is out of range or has not been written.
    #[must_use]
    pub fn get(&self, t: usize) -> &ScalarField2D {
        let steps = self.slices.len();
        self.slices
            .get(t)
            .unwrap_or_else(|| panic!("{}: step {t} out of range 0..{steps}", self.name))
            .as_ref()
            .unwrap_or_else(|| panic!("{}: step {t} read before it was written", self.name))
    }

    /// Replace the initial (`t = 0`) slice
    ///
    /// # Panics
    ///
    /// Panics if the arena has no slots or the resolution differs.
    pub fn set_initial(&mut self, field: ScalarField2D) {
        assert_eq!(field.resolution(), self.n, "{}: resolution mismatch", self.name);
        self.slices[0] = Some(field);
    }

    /// Mutable access to the initial slice (the optimizer's parameters)
    ///
    /// # Panics
    ///
    /// Panics if the initial slice was never set.
    pub fn initial_mut(&mut self) -> &mut ScalarField2D {
        self.slices[0]
            .as_mut()
            .unwrap_or_else(|| panic!("{}: initial slice not set", self.name))
    }
}

/// `sweeps + 1` pressure slices per step: slot 0 is the initial guess,
/// slot `k + 1` the result of sweep `k`
#[derive(Debug, Clone)]
pub struct IterationIndexedField {
    name: &'static str,
    n: usize,
    steps: usize,
    slots_per_step: usize,
    slices: Vec<Option<ScalarField2D>>,
}

impl IterationIndexedField {
    /// Create an arena for `steps` steps of `sweeps` relaxation sweeps each
    #[must_use]
    pub fn new(name: &'static str, steps: usize, sweeps: usize, n: usize) -> Self {
        let slots_per_step = sweeps + 1;
        Self {
            name,
            n,
            steps,
            slots_per_step,
            slices: vec![None; steps * slots_per_step],
        }
    }

    /// Number of relaxation sweeps per step
    #[must_use]
    pub fn sweeps(&self) -> usize {
        self.slots_per_step - 1
    }

    /// Drop every slice
    pub fn reset(&mut self) {
        self.slices.fill(None);
    }

    fn slot(&self, t: usize, k: usize) -> usize {
        assert!(
            t < self.steps && k < self.slots_per_step,
            "{}: slot ({t}, {k}) out of range ({}, {})",
            self.name,
            self.steps,
            self.slots_per_step
        );
        t * self.slots_per_step + k
    }

    /// Write sweep slot `k` of step `t`
    ///
    /// # Panics
    ///
    /// Panics if the slot is out of range or already written.
    pub fn commit(&mut self, t: usize, k: usize, field: ScalarField2D) {
        assert_eq!(field.resolution(), self.n, "{}: resolution mismatch", self.name);
        let idx = self.slot(t, k);
        assert!(
            self.slices[idx].is_none(),
            "{}: slot ({t}, {k}) written twice",
            self.name
        );
        self.slices[idx] = Some(field);
    }

    /// Read sweep slot `k` of step `t`
    ///
    /// # Panics
    ///
    /// Panics if the slot is out of range or unwritten.
    #[must_use]
    pub fn get(&self, t: usize, k: usize) -> &ScalarField2D {
        let idx = self.slot(t, k);
        self.slices[idx].as_ref().unwrap_or_else(|| {
            panic!("{}: slot ({t}, {k}) read before it was written", self.name)
        })
    }

    /// Final slot (`K`) of step `t`
    #[must_use]
    pub fn last(&self, t: usize) -> &ScalarField2D {
        self.get(t, self.slots_per_step - 1)
    }
}
