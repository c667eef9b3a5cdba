use std::error::Error;

use coarse_prof::profile;
use nalgebra::{DVector, DVectorSlice, DVectorSliceMut, RealField};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};

use crate::implicit::{ImplicitIterative, ImplicitIterativeSettings};
use crate::integrable::{CorrectionFactors, IntegrableIIorder};
use crate::integrators::{
    check_step_size, increment_x, log_iteration, log_not_converged, missing_integrable, scatter_second_order,
    setup_second_order,
};
use crate::state::{SecondOrderState, StateDelta};
use crate::timestepper::{Timestepper, TimestepperCore, TimestepperKind, TimestepperSettings};

/// Parameters of the Newmark-beta scheme.
///
/// `gamma` is kept in `[0.5, 1]` and `beta` in `[0, 1]`: the setters clamp out-of-range values.
/// Notable choices are
///  - `gamma = 0.5, beta = 0.25`: constant average acceleration (no numerical damping),
///  - `gamma = 0.5, beta = 1/6`: linear acceleration,
///  - `gamma > 0.5`: numerical damping, at the price of first order accuracy.
///
/// The default `gamma = 0.6, beta = 0.3` is damped, which is robust for constrained systems.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewmarkParameters<T> {
    gamma: T,
    beta: T,
}

#[replace_float_literals(T::from_f64(literal).unwrap())]
impl<T: RealField> Default for NewmarkParameters<T> {
    fn default() -> Self {
        Self { gamma: 0.6, beta: 0.3 }
    }
}

#[replace_float_literals(T::from_f64(literal).unwrap())]
impl<T: RealField> NewmarkParameters<T> {
    pub fn new(gamma: T, beta: T) -> Self {
        let mut parameters = Self::default();
        parameters.set_gamma_beta(gamma, beta);
        parameters
    }

    pub fn gamma(&self) -> T {
        self.gamma
    }

    pub fn beta(&self) -> T {
        self.beta
    }

    /// Sets `gamma`, clamped to `[0.5, 1]`.
    pub fn set_gamma(&mut self, gamma: T) {
        self.gamma = clamp(gamma, 0.5, 1.0);
    }

    /// Sets `beta`, clamped to `[0, 1]`.
    pub fn set_beta(&mut self, beta: T) {
        self.beta = clamp(beta, 0.0, 1.0);
    }

    pub fn set_gamma_beta(&mut self, gamma: T, beta: T) {
        self.set_gamma(gamma);
        self.set_beta(beta);
    }
}

fn clamp<T: RealField>(value: T, min: T, max: T) -> T {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}

/// Constrained Newmark-beta scheme.
///
/// The discretization is given by
///  x^{n+1} = x^n + dt * v^n + dt^2 * ((0.5 - beta) * a^n + beta * a^{n+1})
///  v^{n+1} = v^n + dt * ((1 - gamma) * a^n + gamma * a^{n+1})
///  M a^{n+1} = F(t^{n+1}, x^{n+1}, v^{n+1}) + Cq^T L
///  C(x^{n+1}, t^{n+1}) = 0
/// and solved with Newton iterations on the acceleration, starting from a^{n+1} = a^n. The
/// acceleration of the previous step is the one stored in the system. Each correction solves
///  | G    Cq^T | |  da |   |  R  |
///  | Cq   0    | | -dl | = | -Qc |
/// with
///  G = M - gamma * dt * dF/dv - beta * dt^2 * dF/dx,
///  R = F + Cq^T L - M a^{n+1},
///  Qc = C / (beta * dt^2).
///
/// With `beta = 0` the positions do not depend on `a^{n+1}`: `Qc` is then scaled with
/// `1 / dt^2`, but the resulting corrections only reach velocities and multipliers, so
/// position-level constraint drift is not corrected.
#[derive(Debug)]
pub struct Newmark<T: RealField, S> {
    core: TimestepperCore<T, S>,
    state: SecondOrderState<T>,
    iterative: ImplicitIterative<T>,
    parameters: NewmarkParameters<T>,
}

impl<T: RealField, S> Newmark<T, S> {
    pub fn new(
        settings: TimestepperSettings<T>,
        iterative_settings: ImplicitIterativeSettings<T>,
        parameters: NewmarkParameters<T>,
    ) -> Self {
        Self {
            core: TimestepperCore::new(settings),
            state: SecondOrderState::default(),
            iterative: ImplicitIterative::new(iterative_settings),
            parameters: NewmarkParameters::new(parameters.gamma, parameters.beta),
        }
    }

    pub fn parameters(&self) -> &NewmarkParameters<T> {
        &self.parameters
    }

    /// Sets both parameters through the clamping setters.
    pub fn set_gamma_beta(&mut self, gamma: T, beta: T) {
        self.parameters.set_gamma_beta(gamma, beta);
    }
}

impl<T: RealField, S> Default for Newmark<T, S> {
    fn default() -> Self {
        Self::new(
            TimestepperSettings::default(),
            ImplicitIterativeSettings::default(),
            NewmarkParameters::default(),
        )
    }
}

#[replace_float_literals(T::from_f64(literal).unwrap())]
impl<T, S> Timestepper<T> for Newmark<T, S>
where
    T: RealField,
    S: IntegrableIIorder<T>,
{
    type System = S;

    fn kind(&self) -> TimestepperKind {
        TimestepperKind::Newmark
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

    fn newmark_parameters(&self) -> Option<&NewmarkParameters<T>> {
        Some(&self.parameters)
    }

    fn newmark_parameters_mut(&mut self) -> Option<&mut NewmarkParameters<T>> {
        Some(&mut self.parameters)
    }

    fn advance(&mut self, dt: T) -> Result<(), Box<dyn Error>> {
        profile!("newmark advance");
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
        let gamma = self.parameters.gamma;
        let beta = self.parameters.beta;

        system.state_gather(DVectorSliceMut::from(&mut *x), DVectorSliceMut::from(&mut *v));
        system.state_gather_acceleration(DVectorSliceMut::from(&mut *a));
        let t_new = *time + dt;

        // x^{n+1} and v^{n+1} as functions of the acceleration a^{n+1}
        let newmark_x = |system: &mut S, a_new: &StateDelta<T>| {
            let dx = &*v * dt + &*a * (dt * dt * (0.5 - beta)) + a_new * (dt * dt * beta);
            increment_x(system, x, &dx)
        };
        let newmark_v = |a_new: &StateDelta<T>| &*v + &*a * (dt * (1.0 - gamma)) + a_new * (dt * gamma);

        // Warm start: a^{n+1} <- a^n
        let mut a_new = a.clone();
        let mut x_new = newmark_x(&mut *system, &a_new);
        let mut v_new = newmark_v(&a_new);

        // With beta = 0 positions do not depend on a^{n+1}; fall back to dt^2 scaling.
        // Position drift is then left uncorrected.
        let qc_scaling = if beta > 0.0 { 1.0 / (beta * dt * dt) } else { 1.0 / (dt * dt) };

        let mut da = StateDelta::zeros(v.len());
        let mut dl = DVector::zeros(l.len());
        let mut converged = false;

        for iteration in 0..iterative.max_iters() {
            iterative.begin_iteration();
            system.state_scatter(DVectorSlice::from(&x_new), DVectorSlice::from(&v_new), t_new)?;

            // R <- F + Cq^T L - M a^{n+1}
            let mut r = StateDelta::zeros(v.len());
            system.load_residual_f(DVectorSliceMut::from(&mut r), 1.0);
            system.load_residual_cql(DVectorSliceMut::from(&mut r), DVectorSlice::from(&*l), 1.0);
            system.load_residual_mv(DVectorSliceMut::from(&mut r), DVectorSlice::from(&a_new), -1.0);

            // Qc <- C / (beta * dt^2)
            let mut qc = DVector::zeros(l.len());
            system.load_constraint_c(DVectorSliceMut::from(&mut qc), qc_scaling);
            settings.qc_clamping().apply(&mut qc);

            let factors = CorrectionFactors::new(1.0, -gamma * dt, -beta * dt * dt);
            iterative.solve_correction(system, factors, &x_new, &v_new, t_new, &mut da, &mut dl, &r, &qc)?;

            *l += &dl;
            a_new += &da;
            x_new = newmark_x(&mut *system, &a_new);
            v_new = newmark_v(&a_new);

            if settings.verbose() {
                log_iteration(TimestepperKind::Newmark, iteration, &r, &qc, &da, &dl);
            }
            if iterative.is_converged(&da, &a_new, &dl, l) {
                converged = true;
                break;
            }
        }

        if !converged && settings.verbose() {
            log_not_converged(TimestepperKind::Newmark, iterative.max_iters());
        }

        *x = x_new;
        *v = v_new;
        *a = a_new;
        *time = t_new;

        scatter_second_order(system, &self.state, l, *time)
    }
}
