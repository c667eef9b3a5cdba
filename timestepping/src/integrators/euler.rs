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

/// Implicit (backward) Euler for constrained second-order systems.
///
/// The discretization is given by
///  M (v^{n+1} - v^n) = dt * F(t^{n+1}, x^{n+1}, v^{n+1}) + dt * Cq^T L
///         x^{n+1} = x^n + dt * v^{n+1}
///  C(x^{n+1}, t^{n+1}) = 0
/// and solved with Newton iterations on the velocity, starting from v^{n+1} = v^n. Each
/// correction solves
///  | G    Cq^T | |  dv |   |  R  |
///  | Cq   0    | | -dl | = | -Qc |
/// with
///  G = M - dt * dF/dv - dt^2 * dF/dx,
///  R = dt * F + M (v^n - v^{n+1}) + dt * Cq^T L,
///  Qc = C / dt.
#[derive(Debug)]
pub struct EulerImplicit<T: RealField, S> {
    core: TimestepperCore<T, S>,
    state: SecondOrderState<T>,
    iterative: ImplicitIterative<T>,
}

impl<T: RealField, S> EulerImplicit<T, S> {
    pub fn new(settings: TimestepperSettings<T>, iterative_settings: ImplicitIterativeSettings<T>) -> Self {
        Self {
            core: TimestepperCore::new(settings),
            state: SecondOrderState::default(),
            iterative: ImplicitIterative::new(iterative_settings),
        }
    }
}

impl<T: RealField, S> Default for EulerImplicit<T, S> {
    fn default() -> Self {
        Self::new(TimestepperSettings::default(), ImplicitIterativeSettings::default())
    }
}

#[replace_float_literals(T::from_f64(literal).unwrap())]
impl<T, S> Timestepper<T> for EulerImplicit<T, S>
where
    T: RealField,
    S: IntegrableIIorder<T>,
{
    type System = S;

    fn kind(&self) -> TimestepperKind {
        TimestepperKind::EulerImplicit
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
        profile!("euler implicit advance");
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

        // Warm start: x^{n+1} <- x^n + dt * v^n, v^{n+1} <- v^n
        let mut v_new = v.clone();
        let mut x_new = increment_x(system, x, &(&*v * dt));

        let mut dv = StateDelta::zeros(v.len());
        let mut dl = DVector::zeros(l.len());
        let mut converged = false;

        for iteration in 0..iterative.max_iters() {
            iterative.begin_iteration();
            system.state_scatter(DVectorSlice::from(&x_new), DVectorSlice::from(&v_new), t_new)?;

            // R <- dt * F + M (v^n - v^{n+1}) + dt * Cq^T L
            let mut r = StateDelta::zeros(v.len());
            system.load_residual_f(DVectorSliceMut::from(&mut r), dt);
            system.load_residual_mv(DVectorSliceMut::from(&mut r), DVectorSlice::from(&(&*v - &v_new)), 1.0);
            system.load_residual_cql(DVectorSliceMut::from(&mut r), DVectorSlice::from(&*l), dt);

            // Qc <- C / dt
            let mut qc = DVector::zeros(l.len());
            system.load_constraint_c(DVectorSliceMut::from(&mut qc), 1.0 / dt);
            settings.qc_clamping().apply(&mut qc);

            let factors = CorrectionFactors::new(1.0, -dt, -dt * dt);
            iterative.solve_correction(system, factors, &x_new, &v_new, t_new, &mut dv, &mut dl, &r, &qc)?;

            dl /= dt;
            *l += &dl;
            v_new += &dv;
            x_new = increment_x(system, x, &(&v_new * dt));

            if settings.verbose() {
                log_iteration(TimestepperKind::EulerImplicit, iteration, &r, &qc, &dv, &dl);
            }
            if iterative.is_converged(&dv, &v_new, &dl, l) {
                converged = true;
                break;
            }
        }

        if !converged && settings.verbose() {
            log_not_converged(TimestepperKind::EulerImplicit, iterative.max_iters());
        }

        *a = (&v_new - &*v) / dt;
        *x = x_new;
        *v = v_new;
        *time = t_new;

        scatter_second_order(system, &self.state, l, *time)
    }
}

/// Linearized implicit Euler (Anitescu, Stewart and Trinkle).
///
/// A single linear solve per step, without convergence test:
///  | G    Cq^T | |  v^{n+1}  |   |  R  |
///  | Cq   0    | | -dt * L   | = | -Qc |
/// with
///  G = M - dt * dF/dv - dt^2 * dF/dx,
///  R = dt * F + M v^n,
///  Qc = C / dt + dC/dt,
/// followed by x^{n+1} = x^n + dt * v^{n+1}.
#[derive(Debug)]
pub struct EulerImplicitLinearized<T: RealField, S> {
    core: TimestepperCore<T, S>,
    state: SecondOrderState<T>,
}

impl<T: RealField, S> EulerImplicitLinearized<T, S> {
    pub fn new(settings: TimestepperSettings<T>) -> Self {
        Self {
            core: TimestepperCore::new(settings),
            state: SecondOrderState::default(),
        }
    }
}

impl<T: RealField, S> Default for EulerImplicitLinearized<T, S> {
    fn default() -> Self {
        Self::new(TimestepperSettings::default())
    }
}

#[replace_float_literals(T::from_f64(literal).unwrap())]
impl<T, S> Timestepper<T> for EulerImplicitLinearized<T, S>
where
    T: RealField,
    S: IntegrableIIorder<T>,
{
    type System = S;

    fn kind(&self) -> TimestepperKind {
        TimestepperKind::EulerImplicitLinearized
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

    fn advance(&mut self, dt: T) -> Result<(), Box<dyn Error>> {
        profile!("euler implicit linearized advance");
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

        system.state_gather(DVectorSliceMut::from(&mut *x), DVectorSliceMut::from(&mut *v));
        let t_new = *time + dt;

        // R <- dt * F + M v^n
        let mut r = StateDelta::zeros(v.len());
        system.load_residual_f(DVectorSliceMut::from(&mut r), dt);
        system.load_residual_mv(DVectorSliceMut::from(&mut r), DVectorSlice::from(&*v), 1.0);

        // Qc <- C / dt + dC/dt
        let mut qc = DVector::zeros(l.len());
        system.load_constraint_c(DVectorSliceMut::from(&mut qc), 1.0 / dt);
        system.load_constraint_ct(DVectorSliceMut::from(&mut qc), 1.0);
        settings.qc_clamping().apply(&mut qc);

        let factors = CorrectionFactors::new(1.0, -dt, -dt * dt);
        system.setup_correction(factors, DVectorSlice::from(&*x), DVectorSlice::from(&*v), t_new)?;
        let mut v_new = StateDelta::zeros(v.len());
        system.solve_correction(
            DVectorSliceMut::from(&mut v_new),
            DVectorSliceMut::from(&mut *l),
            DVectorSlice::from(&r),
            DVectorSlice::from(&qc),
        )?;
        *l /= dt;

        *a = (&v_new - &*v) / dt;
        *x = increment_x(system, x, &(&v_new * dt));
        *v = v_new;
        *time = t_new;

        scatter_second_order(system, &self.state, l, *time)
    }
}

/// Implicit Euler with a position projection (Tasora).
///
/// The step is split into a speed problem, which is the linearized implicit Euler step with
/// only the velocity-level constraint term `Qc = dC/dt`, followed by a position problem
///  | M    Cq^T | |  dx |   |  0 |
///  | Cq   0    | | -dl | = | -C |
/// which projects the positions back onto the constraint manifold.
#[derive(Debug)]
pub struct EulerImplicitProjected<T: RealField, S> {
    core: TimestepperCore<T, S>,
    state: SecondOrderState<T>,
}

impl<T: RealField, S> EulerImplicitProjected<T, S> {
    pub fn new(settings: TimestepperSettings<T>) -> Self {
        Self {
            core: TimestepperCore::new(settings),
            state: SecondOrderState::default(),
        }
    }
}

impl<T: RealField, S> Default for EulerImplicitProjected<T, S> {
    fn default() -> Self {
        Self::new(TimestepperSettings::default())
    }
}

#[replace_float_literals(T::from_f64(literal).unwrap())]
impl<T, S> Timestepper<T> for EulerImplicitProjected<T, S>
where
    T: RealField,
    S: IntegrableIIorder<T>,
{
    type System = S;

    fn kind(&self) -> TimestepperKind {
        TimestepperKind::EulerImplicitProjected
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

    fn advance(&mut self, dt: T) -> Result<(), Box<dyn Error>> {
        profile!("euler implicit projected advance");
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

        system.state_gather(DVectorSliceMut::from(&mut *x), DVectorSliceMut::from(&mut *v));
        let t_new = *time + dt;

        // Speed problem
        {
            // R <- dt * F + M v^n
            let mut r = StateDelta::zeros(v.len());
            system.load_residual_f(DVectorSliceMut::from(&mut r), dt);
            system.load_residual_mv(DVectorSliceMut::from(&mut r), DVectorSlice::from(&*v), 1.0);

            // Qc <- dC/dt
            let mut qc = DVector::zeros(l.len());
            system.load_constraint_ct(DVectorSliceMut::from(&mut qc), 1.0);
            settings.qc_clamping().apply(&mut qc);

            let factors = CorrectionFactors::new(1.0, -dt, -dt * dt);
            system.setup_correction(factors, DVectorSlice::from(&*x), DVectorSlice::from(&*v), t_new)?;
            let mut v_new = StateDelta::zeros(v.len());
            system.solve_correction(
                DVectorSliceMut::from(&mut v_new),
                DVectorSliceMut::from(&mut *l),
                DVectorSlice::from(&r),
                DVectorSlice::from(&qc),
            )?;
            *l /= dt;

            *a = (&v_new - &*v) / dt;
            *x = increment_x(system, x, &(&v_new * dt));
            *v = v_new;
        }

        system.state_scatter(DVectorSlice::from(&*x), DVectorSlice::from(&*v), t_new)?;

        // Position problem
        {
            let r = StateDelta::zeros(v.len());

            // Qc <- C
            let mut qc = DVector::zeros(l.len());
            system.load_constraint_c(DVectorSliceMut::from(&mut qc), 1.0);
            settings.qc_clamping().apply(&mut qc);

            let factors = CorrectionFactors::new(1.0, 0.0, 0.0);
            system.setup_correction(factors, DVectorSlice::from(&*x), DVectorSlice::from(&*v), t_new)?;
            let mut dx = StateDelta::zeros(v.len());
            let mut dl = DVector::zeros(l.len());
            system.solve_correction(
                DVectorSliceMut::from(&mut dx),
                DVectorSliceMut::from(&mut dl),
                DVectorSlice::from(&r),
                DVectorSlice::from(&qc),
            )?;
            *x = increment_x(system, x, &dx);
        }

        *time = t_new;

        scatter_second_order(system, &self.state, l, *time)
    }
}
