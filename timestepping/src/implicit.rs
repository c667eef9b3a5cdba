use std::error::Error;

use nalgebra::{DVector, DVectorSlice, DVectorSliceMut, RealField};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};

use crate::integrable::{CorrectionFactors, IntegrableIIorder};
use crate::state::wrms_norm;

/// Tolerances and iteration cap of the Newton-Raphson procedure of implicit schemes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplicitIterativeSettings<T> {
    max_iters: usize,
    rel_tol: T,
    abs_tol_s: T,
    abs_tol_l: T,
}

#[replace_float_literals(T::from_f64(literal).unwrap())]
impl<T: RealField> Default for ImplicitIterativeSettings<T> {
    fn default() -> Self {
        Self {
            max_iters: 6,
            rel_tol: 1e-4,
            abs_tol_s: 1e-10,
            abs_tol_l: 1e-10,
        }
    }
}

impl<T: RealField> ImplicitIterativeSettings<T> {
    /// Maximum number of Newton iterations per step. Always at least one.
    pub fn max_iters(&self) -> usize {
        self.max_iters
    }

    /// Relative tolerance of the convergence test.
    pub fn rel_tol(&self) -> T {
        self.rel_tol
    }

    /// Absolute tolerance on state increments.
    pub fn abs_tol_s(&self) -> T {
        self.abs_tol_s
    }

    /// Absolute tolerance on Lagrange multiplier increments.
    pub fn abs_tol_l(&self) -> T {
        self.abs_tol_l
    }

    /// Sets the iteration cap. A value of zero is raised to one.
    pub fn set_max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters.max(1);
        self
    }

    pub fn set_rel_tol(mut self, rel_tol: T) -> Self {
        self.rel_tol = rel_tol;
        self
    }

    /// Sets separate absolute tolerances for states and Lagrange multipliers.
    pub fn set_abs_tols(mut self, abs_tol_s: T, abs_tol_l: T) -> Self {
        self.abs_tol_s = abs_tol_s;
        self.abs_tol_l = abs_tol_l;
        self
    }

    /// Sets the same absolute tolerance for states and Lagrange multipliers.
    pub fn set_abs_tol(self, abs_tol: T) -> Self {
        self.set_abs_tols(abs_tol, abs_tol)
    }
}

/// Newton-Raphson convergence controller of iterative implicit schemes.
///
/// Besides the settings, it keeps running counters of iterations and of calls to the setup
/// and solve phases of the system's linear solver. The counters are never reset by stepping;
/// use `reset_counters` to do so.
#[derive(Debug, Clone, PartialEq)]
pub struct ImplicitIterative<T> {
    settings: ImplicitIterativeSettings<T>,
    num_iters: usize,
    num_setups: usize,
    num_solves: usize,
}

impl<T: RealField> Default for ImplicitIterative<T> {
    fn default() -> Self {
        Self::new(ImplicitIterativeSettings::default())
    }
}

impl<T: RealField> ImplicitIterative<T> {
    pub fn new(settings: ImplicitIterativeSettings<T>) -> Self {
        let mut iterative = Self {
            settings: ImplicitIterativeSettings::default(),
            num_iters: 0,
            num_setups: 0,
            num_solves: 0,
        };
        iterative.apply_settings(&settings);
        iterative
    }

    pub fn settings(&self) -> &ImplicitIterativeSettings<T> {
        &self.settings
    }

    /// Applies settings through the validating setters.
    pub fn apply_settings(&mut self, settings: &ImplicitIterativeSettings<T>) {
        self.set_max_iters(settings.max_iters);
        self.set_rel_tolerance(settings.rel_tol);
        self.set_abs_tolerances(settings.abs_tol_s, settings.abs_tol_l);
    }

    pub fn max_iters(&self) -> usize {
        self.settings.max_iters
    }

    /// Sets the maximum number of Newton iterations. A value of zero is raised to one.
    pub fn set_max_iters(&mut self, max_iters: usize) {
        self.settings.max_iters = max_iters.max(1);
    }

    pub fn set_rel_tolerance(&mut self, rel_tol: T) {
        self.settings.rel_tol = rel_tol;
    }

    /// Sets separate absolute tolerances for states and Lagrange multipliers.
    pub fn set_abs_tolerances(&mut self, abs_tol_s: T, abs_tol_l: T) {
        self.settings.abs_tol_s = abs_tol_s;
        self.settings.abs_tol_l = abs_tol_l;
    }

    /// Sets the same absolute tolerance for states and Lagrange multipliers.
    pub fn set_abs_tolerance(&mut self, abs_tol: T) {
        self.set_abs_tolerances(abs_tol, abs_tol);
    }

    /// Number of Newton iterations performed so far.
    pub fn num_iterations(&self) -> usize {
        self.num_iters
    }

    /// Number of calls to the setup phase of the linear solver.
    pub fn num_setup_calls(&self) -> usize {
        self.num_setups
    }

    /// Number of calls to the solve phase of the linear solver.
    pub fn num_solve_calls(&self) -> usize {
        self.num_solves
    }

    pub fn reset_counters(&mut self) {
        self.num_iters = 0;
        self.num_setups = 0;
        self.num_solves = 0;
    }

    pub(crate) fn begin_iteration(&mut self) {
        self.num_iters += 1;
    }

    /// Sets up and solves the correction system of the current Newton iteration.
    ///
    /// Both phases are counted, also when the system reports an error.
    pub(crate) fn solve_correction<S>(
        &mut self,
        system: &mut S,
        factors: CorrectionFactors<T>,
        x: &DVector<T>,
        v: &DVector<T>,
        t: T,
        ds: &mut DVector<T>,
        dl: &mut DVector<T>,
        r: &DVector<T>,
        qc: &DVector<T>,
    ) -> Result<(), Box<dyn Error>>
    where
        S: IntegrableIIorder<T>,
    {
        self.num_setups += 1;
        system.setup_correction(factors, DVectorSlice::from(x), DVectorSlice::from(v), t)?;
        self.num_solves += 1;
        system.solve_correction(
            DVectorSliceMut::from(ds),
            DVectorSliceMut::from(dl),
            DVectorSlice::from(r),
            DVectorSlice::from(qc),
        )
    }

    /// Convergence test of a Newton correction.
    ///
    /// The correction `(ds, dl)` of the state `s` and the multipliers `l` is accepted when
    /// both weighted RMS norms, with weights `1 / (rel_tol * |s_i| + abs_tol_s)` and
    /// `1 / (rel_tol * |l_i| + abs_tol_l)` respectively, do not exceed one.
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    pub fn is_converged(&self, ds: &DVector<T>, s: &DVector<T>, dl: &DVector<T>, l: &DVector<T>) -> bool {
        let error_s = wrms_norm(ds, s, self.settings.rel_tol, self.settings.abs_tol_s);
        let error_l = wrms_norm(dl, l, self.settings.rel_tol, self.settings.abs_tol_l);
        error_s <= 1.0 && error_l <= 1.0
    }
}
