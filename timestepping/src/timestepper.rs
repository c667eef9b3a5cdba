use std::error::Error;
use std::fmt;
use std::fmt::Display;

use nalgebra::{DVector, RealField};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};

use crate::implicit::ImplicitIterative;
use crate::integrators::NewmarkParameters;
use crate::record::TimestepperRecord;
use crate::state::{FirstOrderState, SecondOrderState};

/// The closed set of integration schemes provided by this crate.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimestepperKind {
    /// Forward Euler for first-order systems.
    EulerExplicit,
    /// Forward Euler for second-order systems.
    EulerExplicitIIorder,
    /// Semi-implicit (symplectic) Euler.
    EulerSemiImplicit,
    /// Classical 4-stage Runge-Kutta.
    RungeKutta4,
    /// Heun's predictor-corrector method.
    Heun,
    /// Leapfrog, reusing the acceleration of the previous step.
    Leapfrog,
    /// Implicit Euler with Newton iterations.
    EulerImplicit,
    /// Implicit Euler with a single linearized correction (Anitescu/Stewart/Trinkle).
    EulerImplicitLinearized,
    /// Semi-implicit Euler followed by a position projection (Tasora).
    EulerImplicitProjected,
    /// Modified implicit trapezoidal rule, first order in constraint reactions.
    Trapezoidal,
    /// Trapezoidal rule with a single Newton iteration.
    TrapezoidalLinearized,
    /// Simplified linearized trapezoidal rule. Its results are not verified.
    TrapezoidalLinearized2,
    /// Constrained Newmark-beta.
    Newmark,
}

/// The order of the systems a timestepper operates on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Order {
    /// Systems implementing `Integrable`.
    First,
    /// Systems implementing `IntegrableIIorder`.
    Second,
}

impl TimestepperKind {
    pub const ALL: [TimestepperKind; 13] = [
        TimestepperKind::EulerExplicit,
        TimestepperKind::EulerExplicitIIorder,
        TimestepperKind::EulerSemiImplicit,
        TimestepperKind::RungeKutta4,
        TimestepperKind::Heun,
        TimestepperKind::Leapfrog,
        TimestepperKind::EulerImplicit,
        TimestepperKind::EulerImplicitLinearized,
        TimestepperKind::EulerImplicitProjected,
        TimestepperKind::Trapezoidal,
        TimestepperKind::TrapezoidalLinearized,
        TimestepperKind::TrapezoidalLinearized2,
        TimestepperKind::Newmark,
    ];

    pub fn order(&self) -> Order {
        use TimestepperKind::*;
        match self {
            EulerExplicit | RungeKutta4 | Heun => Order::First,
            _ => Order::Second,
        }
    }

    pub fn is_implicit(&self) -> bool {
        use TimestepperKind::*;
        match self {
            EulerImplicit
            | EulerImplicitLinearized
            | EulerImplicitProjected
            | Trapezoidal
            | TrapezoidalLinearized
            | TrapezoidalLinearized2
            | Newmark => true,
            _ => false,
        }
    }

    /// Whether the scheme carries the Newton convergence controller and its counters.
    pub fn is_iterative(&self) -> bool {
        use TimestepperKind::*;
        match self {
            EulerImplicit | Trapezoidal | TrapezoidalLinearized | TrapezoidalLinearized2 | Newmark => true,
            _ => false,
        }
    }
}

impl Display for TimestepperKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Clamping policy for the constraint correction term `Qc`.
///
/// When enabled, every component of `Qc` handed to the linear solver satisfies
/// `|Qc_i| <= limit`.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcClamping<T> {
    enabled: bool,
    limit: T,
}

#[replace_float_literals(T::from_f64(literal).unwrap())]
impl<T: RealField> Default for QcClamping<T> {
    fn default() -> Self {
        Self {
            enabled: false,
            limit: 1e30,
        }
    }
}

impl<T: RealField> QcClamping<T> {
    /// Clamping enabled with the given (non-negative) limit.
    pub fn enabled(limit: T) -> Self {
        Self {
            enabled: true,
            limit: limit.abs(),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn limit(&self) -> T {
        self.limit
    }

    pub fn set_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn set_limit(mut self, limit: T) -> Self {
        self.limit = limit.abs();
        self
    }

    /// Clamps every component of `qc` into `[-limit, limit]` if clamping is enabled.
    pub fn apply(&self, qc: &mut DVector<T>) {
        if !self.enabled {
            return;
        }
        for q in qc.iter_mut() {
            if *q > self.limit {
                *q = self.limit;
            } else if *q < -self.limit {
                *q = -self.limit;
            }
        }
    }
}

/// Configuration shared by all timesteppers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestepperSettings<T> {
    verbose: bool,
    qc_clamping: QcClamping<T>,
}

impl<T: RealField> Default for TimestepperSettings<T> {
    fn default() -> Self {
        Self {
            verbose: false,
            qc_clamping: QcClamping::default(),
        }
    }
}

impl<T: RealField> TimestepperSettings<T> {
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn qc_clamping(&self) -> &QcClamping<T> {
        &self.qc_clamping
    }

    pub fn set_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn set_qc_clamping(mut self, qc_clamping: QcClamping<T>) -> Self {
        self.qc_clamping = qc_clamping.set_limit(qc_clamping.limit);
        self
    }
}

/// Data common to every timestepper: the attached system, the current time, the Lagrange
/// multipliers and the settings.
#[derive(Debug)]
pub struct TimestepperCore<T: RealField, S> {
    pub(crate) integrable: Option<S>,
    pub(crate) time: T,
    pub(crate) l: DVector<T>,
    pub(crate) settings: TimestepperSettings<T>,
}

impl<T: RealField, S> TimestepperCore<T, S> {
    pub fn new(settings: TimestepperSettings<T>) -> Self {
        Self {
            integrable: None,
            time: T::zero(),
            l: DVector::zeros(0),
            settings,
        }
    }

    /// Resets the Lagrange multipliers to zero with the given dimension.
    pub(crate) fn reset_multipliers(&mut self, num_constraints: usize) {
        if self.l.len() == num_constraints {
            self.l.fill(T::zero());
        } else {
            self.l = DVector::zeros(num_constraints);
        }
    }
}

/// A time integrator that advances the state of an attached system.
///
/// Implementors provide access to their `TimestepperCore` and the single abstract operation
/// `advance`; the remaining functionality is shared.
pub trait Timestepper<T: RealField> {
    /// The type of system this timestepper integrates.
    type System;

    fn kind(&self) -> TimestepperKind;

    fn core(&self) -> &TimestepperCore<T, Self::System>;

    fn core_mut(&mut self) -> &mut TimestepperCore<T, Self::System>;

    /// Re-dimensions all owned vectors to match the attached system
    /// (or to zero if no system is attached).
    fn setup_state(&mut self);

    /// Performs an integration step of size `dt`.
    ///
    /// On success the state of the attached system and the time of the timestepper have been
    /// advanced by `dt`. Returns an error if `dt` is not strictly positive, if no system is
    /// attached, or if the system fails to solve. Failure to converge is not an error: the
    /// iteration counters of `implicit_iterative()` can be inspected instead.
    fn advance(&mut self, dt: T) -> Result<(), Box<dyn Error>>;

    /// Discards data cached across steps. Called whenever the system is attached or detached.
    fn invalidate_caches(&mut self) {}

    fn first_order_state(&self) -> Option<&FirstOrderState<T>> {
        None
    }

    fn second_order_state(&self) -> Option<&SecondOrderState<T>> {
        None
    }

    fn implicit_iterative(&self) -> Option<&ImplicitIterative<T>> {
        None
    }

    fn implicit_iterative_mut(&mut self) -> Option<&mut ImplicitIterative<T>> {
        None
    }

    fn newmark_parameters(&self) -> Option<&NewmarkParameters<T>> {
        None
    }

    fn newmark_parameters_mut(&mut self) -> Option<&mut NewmarkParameters<T>> {
        None
    }

    /// The current time.
    fn time(&self) -> T {
        self.core().time
    }

    fn set_time(&mut self, time: T) {
        self.core_mut().time = time;
    }

    /// The Lagrange multipliers computed by the latest step.
    fn lagrange_multipliers(&self) -> &DVector<T> {
        &self.core().l
    }

    fn integrable(&self) -> Option<&Self::System> {
        self.core().integrable.as_ref()
    }

    fn integrable_mut(&mut self) -> Option<&mut Self::System> {
        self.core_mut().integrable.as_mut()
    }

    /// Attaches a system, re-dimensioning all owned vectors, and returns the previously
    /// attached system, if any.
    fn set_integrable(&mut self, system: Self::System) -> Option<Self::System> {
        let previous = self.core_mut().integrable.replace(system);
        self.invalidate_caches();
        self.setup_state();
        previous
    }

    /// Builder-style variant of `set_integrable`.
    fn with_integrable(mut self, system: Self::System) -> Self
    where
        Self: Sized,
    {
        self.set_integrable(system);
        self
    }

    /// Detaches the system, if any, and returns it.
    fn take_integrable(&mut self) -> Option<Self::System> {
        let previous = self.core_mut().integrable.take();
        self.invalidate_caches();
        self.setup_state();
        previous
    }

    fn settings(&self) -> &TimestepperSettings<T> {
        &self.core().settings
    }

    fn set_verbose(&mut self, verbose: bool) {
        self.core_mut().settings.verbose = verbose;
    }

    fn set_qc_clamping(&mut self, qc_clamping: QcClamping<T>) {
        self.core_mut().settings.qc_clamping = qc_clamping.set_limit(qc_clamping.limit);
    }

    /// Captures the configuration of this timestepper in a persistence record.
    fn to_record(&self) -> TimestepperRecord<T> {
        TimestepperRecord {
            version: TimestepperRecord::<T>::CURRENT_VERSION,
            kind: self.kind(),
            settings: self.settings().clone(),
            iterative: self.implicit_iterative().map(|iterative| iterative.settings().clone()),
            newmark: self.newmark_parameters().cloned(),
        }
    }

    /// Applies the configuration stored in `record`.
    ///
    /// Fails if the record was written by a newer version or for a different kind of
    /// timestepper. Numeric parameters pass through the regular (clamping) setters.
    fn apply_record(&mut self, record: &TimestepperRecord<T>) -> Result<(), Box<dyn Error>> {
        record.check_compatible(self.kind())?;
        let recorded = &record.settings;
        let qc_clamping = QcClamping::disabled()
            .set_enabled(recorded.qc_clamping.enabled)
            .set_limit(recorded.qc_clamping.limit);
        self.core_mut().settings = TimestepperSettings::default()
            .set_verbose(recorded.verbose)
            .set_qc_clamping(qc_clamping);
        if let (Some(iterative), Some(settings)) = (self.implicit_iterative_mut(), record.iterative.as_ref()) {
            iterative.apply_settings(settings);
        }
        if let (Some(parameters), Some(recorded)) = (self.newmark_parameters_mut(), record.newmark.as_ref()) {
            parameters.set_gamma_beta(recorded.gamma(), recorded.beta());
        }
        Ok(())
    }
}
