use std::error::Error;

use coarse_prof::profile;
use nalgebra::{DVector, DVectorSlice, DVectorSliceMut, RealField};
use numeric_literals::replace_float_literals;

use crate::implicit::{ImplicitIterative, ImplicitIterativeSettings};
use crate::integrable::{CorrectionFactors, IntegrableIIorder};
use crate::integrators::{
    check_step_size, increment_x, log_iteration, log_not_converged, missing_integrable, scatter_second_order,
    setup_second_order,
};
use crate::state::{SecondOrderState, StateDelta};
use crate::timestepper::{Timestepper, TimestepperCore, TimestepperKind, TimestepperSettings};

/// Performs a step of the modified trapezoidal rule with at most `max_iters` Newton iterations.
///
/// The discretization is
///  M (v^{n+1} - v^n) = dt/2 (F^n + F^{n+1}) + dt/2 Cq^T L
///         x^{n+1} = x^n + dt/2 (v^n + v^{n+1})
/// where the multipliers of the previous step are taken as zero. This makes the scheme only
/// first order accurate in the reactions, but avoids the oscillations of the textbook rule.
/// Each correction solves
///  | G    Cq^T | |  dv |   |  R  |
///  | Cq   0    | | -dl | = | -Qc |
/// with
///  G = M - dt/2 * dF/dv - dt^2/4 * dF/dx,
///  R = R_old + dt/2 * F^{n+1} - M v^{n+1} + dt/2 * Cq^T L,
///  R_old = dt/2 * F^n + M v^n,
///  Qc = C / dt.
#[replace_float_literals(T::from_f64(literal).unwrap())]
fn trapezoidal_step<T, S>(
    kind: TimestepperKind,
    core: &mut TimestepperCore<T, S>,
    state: &mut SecondOrderState<T>,
    iterative: &mut ImplicitIterative<T>,
    dt: T,
    max_iters: usize,
) -> Result<(), Box<dyn Error>>
where
    T: RealField,
    S: IntegrableIIorder<T>,
{
    let TimestepperCore {
        integrable,
        time,
        l,
        settings,
    } = core;
    let system = integrable.as_mut().ok_or_else(missing_integrable)?;
    let SecondOrderState { x, v, a } = &mut *state;

    system.state_gather(DVectorSliceMut::from(&mut *x), DVectorSliceMut::from(&mut *v));
    let t_new = *time + dt;

    // R_old <- dt/2 * F(t^n, x^n, v^n) + M v^n
    let mut r_old = StateDelta::zeros(v.len());
    system.load_residual_f(DVectorSliceMut::from(&mut r_old), dt * 0.5);
    system.load_residual_mv(DVectorSliceMut::from(&mut r_old), DVectorSlice::from(&*v), 1.0);

    // Warm start: x^{n+1} <- x^n + dt * v^n, v^{n+1} <- v^n
    let mut v_new = v.clone();
    let mut x_new = increment_x(system, x, &(&*v * dt));

    let mut dv = StateDelta::zeros(v.len());
    let mut dl = DVector::zeros(l.len());
    let mut converged = false;

    for iteration in 0..max_iters {
        iterative.begin_iteration();
        system.state_scatter(DVectorSlice::from(&x_new), DVectorSlice::from(&v_new), t_new)?;

        // R <- R_old + dt/2 * F - M v^{n+1} + dt/2 * Cq^T L
        let mut r = r_old.clone();
        system.load_residual_f(DVectorSliceMut::from(&mut r), dt * 0.5);
        system.load_residual_mv(DVectorSliceMut::from(&mut r), DVectorSlice::from(&v_new), -1.0);
        system.load_residual_cql(DVectorSliceMut::from(&mut r), DVectorSlice::from(&*l), dt * 0.5);

        // Qc <- C / dt
        let mut qc = DVector::zeros(l.len());
        system.load_constraint_c(DVectorSliceMut::from(&mut qc), 1.0 / dt);
        settings.qc_clamping().apply(&mut qc);

        let factors = CorrectionFactors::new(1.0, -dt * 0.5, -dt * dt * 0.25);
        iterative.solve_correction(system, factors, &x_new, &v_new, t_new, &mut dv, &mut dl, &r, &qc)?;

        dl *= 2.0 / dt;
        *l += &dl;
        v_new += &dv;
        // x^{n+1} <- x^n + dt/2 * (v^n + v^{n+1})
        x_new = increment_x(system, x, &((&*v + &v_new) * (dt * 0.5)));

        if settings.verbose() {
            log_iteration(kind, iteration, &r, &qc, &dv, &dl);
        }
        if iterative.is_converged(&dv, &v_new, &dl, l) {
            converged = true;
            break;
        }
    }

    if !converged && max_iters > 1 && settings.verbose() {
        log_not_converged(kind, max_iters);
    }

    *a = (&v_new - &*v) / dt;
    *x = x_new;
    *v = v_new;
    *time = t_new;
    // Reactions are reported as the average of the (zero) old and the new multipliers
    *l *= 0.5;

    scatter_second_order(system, state, l, *time)
}

/// Modified implicit trapezoidal rule, first order accurate in constraint reactions.
///
/// See `TrapezoidalLinearized` for a variant which performs a single Newton iteration.
#[derive(Debug)]
pub struct Trapezoidal<T: RealField, S> {
    core: TimestepperCore<T, S>,
    state: SecondOrderState<T>,
    iterative: ImplicitIterative<T>,
}

impl<T: RealField, S> Trapezoidal<T, S> {
    pub fn new(settings: TimestepperSettings<T>, iterative_settings: ImplicitIterativeSettings<T>) -> Self {
        Self {
            core: TimestepperCore::new(settings),
            state: SecondOrderState::default(),
            iterative: ImplicitIterative::new(iterative_settings),
        }
    }
}

impl<T: RealField, S> Default for Trapezoidal<T, S> {
    fn default() -> Self {
        Self::new(TimestepperSettings::default(), ImplicitIterativeSettings::default())
    }
}

impl<T, S> Timestepper<T> for Trapezoidal<T, S>
where
    T: RealField,
    S: IntegrableIIorder<T>,
{
    type System = S;

    fn kind(&self) -> TimestepperKind {
        TimestepperKind::Trapezoidal
    }

    fn core(&self) -> &TimestepperCore<T, S> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TimestepperCore<T, S> {
        &mut self.core
    }

    fn setup_state(&mut self) {
        setup_second_order(&mut self.core, &mut self.state);
    }

    fn second_order_state(&self) -> Option<&SecondOrderState<T>> {
        Some(&self.state)
    }

    fn implicit_iterative(&self) -> Option<&ImplicitIterative<T>> {
        Some(&self.iterative)
    }

    fn implicit_iterative_mut(&mut self) -> Option<&mut ImplicitIterative<T>> {
        Some(&mut self.iterative)
    }

    fn advance(&mut self, dt: T) -> Result<(), Box<dyn Error>> {
        profile!("trapezoidal advance");
        check_step_size(dt)?;
        self.setup_state();

        let max_iters = self.iterative.max_iters();
        trapezoidal_step(
            TimestepperKind::Trapezoidal,
            &mut self.core,
            &mut self.state,
            &mut self.iterative,
            dt,
            max_iters,
        )
    }
}

/// Modified implicit trapezoidal rule with a single Newton iteration per step.
///
/// The iteration cap of the controller is ignored, but its counters are updated.
#[derive(Debug)]
pub struct TrapezoidalLinearized<T: RealField, S> {
    core: TimestepperCore<T, S>,
    state: SecondOrderState<T>,
    iterative: ImplicitIterative<T>,
}

impl<T: RealField, S> TrapezoidalLinearized<T, S> {
    pub fn new(settings: TimestepperSettings<T>, iterative_settings: ImplicitIterativeSettings<T>) -> Self {
        Self {
            core: TimestepperCore::new(settings),
            state: SecondOrderState::default(),
            iterative: ImplicitIterative::new(iterative_settings),
        }
    }
}

impl<T: RealField, S> Default for TrapezoidalLinearized<T, S> {
    fn default() -> Self {
        Self::new(TimestepperSettings::default(), ImplicitIterativeSettings::default())
    }
}

impl<T, S> Timestepper<T> for TrapezoidalLinearized<T, S>
where
    T: RealField,
    S: IntegrableIIorder<T>,
{
    type System = S;

    fn kind(&self) -> TimestepperKind {
        TimestepperKind::TrapezoidalLinearized
    }

    fn core(&self) -> &TimestepperCore<T, S> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TimestepperCore<T, S> {
        &mut self.core
    }

    fn setup_state(&mut self) {
        setup_second_order(&mut self.core, &mut self.state);
    }

    fn second_order_state(&self) -> Option<&SecondOrderState<T>> {
        Some(&self.state)
    }

    fn implicit_iterative(&self) -> Option<&ImplicitIterative<T>> {
        Some(&self.iterative)
    }

    fn implicit_iterative_mut(&mut self) -> Option<&mut ImplicitIterative<T>> {
        Some(&mut self.iterative)
    }

    fn advance(&mut self, dt: T) -> Result<(), Box<dyn Error>> {
        profile!("trapezoidal linearized advance");
        check_step_size(dt)?;
        self.setup_state();

        trapezoidal_step(
            TimestepperKind::TrapezoidalLinearized,
            &mut self.core,
            &mut self.state,
            &mut self.iterative,
            dt,
            1,
        )
    }
}

/// Simplified linearized trapezoidal rule.
///
/// Solves directly for the new velocity with a single linear solve, using
///  R = M v^n + dt/2 * (F^n + F^{n+1})
/// where `F^{n+1}` is evaluated at the explicit prediction `x^n + dt * v^n, v^n`. This
/// formulation is known to be unreliable: its results have not been verified and should not
/// be used as a reference.
#[derive(Debug)]
pub struct TrapezoidalLinearized2<T: RealField, S> {
    core: TimestepperCore<T, S>,
    state: SecondOrderState<T>,
    iterative: ImplicitIterative<T>,
}

impl<T: RealField, S> TrapezoidalLinearized2<T, S> {
    pub fn new(settings: TimestepperSettings<T>, iterative_settings: ImplicitIterativeSettings<T>) -> Self {
        Self {
            core: TimestepperCore::new(settings),
            state: SecondOrderState::default(),
            iterative: ImplicitIterative::new(iterative_settings),
        }
    }
}

impl<T: RealField, S> Default for TrapezoidalLinearized2<T, S> {
    fn default() -> Self {
        Self::new(TimestepperSettings::default(), ImplicitIterativeSettings::default())
    }
}

#[replace_float_literals(T::from_f64(literal).unwrap())]
impl<T, S> Timestepper<T> for TrapezoidalLinearized2<T, S>
where
    T: RealField,
    S: IntegrableIIorder<T>,
{
    type System = S;

    fn kind(&self) -> TimestepperKind {
        TimestepperKind::TrapezoidalLinearized2
    }

    fn core(&self) -> &TimestepperCore<T, S> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TimestepperCore<T, S> {
        &mut self.core
    }

    fn setup_state(&mut self) {
        setup_second_order(&mut self.core, &mut self.state);
    }

    fn second_order_state(&self) -> Option<&SecondOrderState<T>> {
        Some(&self.state)
    }

    fn implicit_iterative(&self) -> Option<&ImplicitIterative<T>> {
        Some(&self.iterative)
    }

    fn implicit_iterative_mut(&mut self) -> Option<&mut ImplicitIterative<T>> {
        Some(&mut self.iterative)
    }

    fn advance(&mut self, dt: T) -> Result<(), Box<dyn Error>> {
        profile!("trapezoidal linearized2 advance");
        check_step_size(dt)?;
        self.setup_state();

        let TimestepperCore {
            integrable,
            time,
            l,
            settings,
        } = &mut self.core;
        let system = integrable.as_mut().ok_or_else(missing_integrable)?;
        let SecondOrderState { x, v, a } = &mut self.state;
        let iterative = &mut self.iterative;

        system.state_gather(DVectorSliceMut::from(&mut *x), DVectorSliceMut::from(&mut *v));
        let t_new = *time + dt;

        // R <- dt/2 * F(t^n, x^n, v^n) + M v^n
        let mut r = StateDelta::zeros(v.len());
        system.load_residual_f(DVectorSliceMut::from(&mut r), dt * 0.5);
        system.load_residual_mv(DVectorSliceMut::from(&mut r), DVectorSlice::from(&*v), 1.0);

        // R <- R + dt/2 * F(t^{n+1}, x^n + dt * v^n, v^n)
        let x_pred = increment_x(system, x, &(&*v * dt));
        system.state_scatter(DVectorSlice::from(&x_pred), DVectorSlice::from(&*v), t_new)?;
        system.load_residual_f(DVectorSliceMut::from(&mut r), dt * 0.5);

        // Qc <- C / dt
        let mut qc = DVector::zeros(l.len());
        system.load_constraint_c(DVectorSliceMut::from(&mut qc), 1.0 / dt);
        settings.qc_clamping().apply(&mut qc);

        iterative.begin_iteration();
        let factors = CorrectionFactors::new(1.0, -dt * 0.5, -dt * dt * 0.25);
        let mut v_new = StateDelta::zeros(v.len());
        iterative.solve_correction(system, factors, &x_pred, &*v, t_new, &mut v_new, l, &r, &qc)?;
        // L <- 2 / dt * dl, reported as the average with the (zero) old multipliers
        *l /= dt;

        if settings.verbose() {
            log_iteration(TimestepperKind::TrapezoidalLinearized2, 0, &r, &qc, &v_new, l);
        }

        *a = (&v_new - &*v) / dt;
        *x = increment_x(system, x, &((&*v + &v_new) * (dt * 0.5)));
        *v = v_new;
        *time = t_new;

        scatter_second_order(system, &self.state, l, *time)
    }
}
