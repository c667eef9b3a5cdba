use std::error::Error;

use coarse_prof::profile;
use log::debug;
use nalgebra::{DVectorSlice, DVectorSliceMut, RealField};
use numeric_literals::replace_float_literals;

use crate::integrable::IntegrableIIorder;
use crate::integrators::{check_step_size, increment_x, missing_integrable, scatter_second_order, setup_second_order};
use crate::state::{SecondOrderState, StateDelta};
use crate::timestepper::{Timestepper, TimestepperCore, TimestepperKind, TimestepperSettings};

/// Forward Euler for second-order systems.
///
///  x^{n+1} = x^n + dt * v^n
///  v^{n+1} = v^n + dt * a(t^n, x^n, v^n)
#[derive(Debug)]
pub struct EulerExplicitIIorder<T: RealField, S> {
    core: TimestepperCore<T, S>,
    state: SecondOrderState<T>,
}

impl<T: RealField, S> EulerExplicitIIorder<T, S> {
    pub fn new(settings: TimestepperSettings<T>) -> Self {
        Self {
            core: TimestepperCore::new(settings),
            state: SecondOrderState::default(),
        }
    }
}

impl<T: RealField, S> Default for EulerExplicitIIorder<T, S> {
    fn default() -> Self {
        Self::new(TimestepperSettings::default())
    }
}

impl<T, S> Timestepper<T> for EulerExplicitIIorder<T, S>
where
    T: RealField,
    S: IntegrableIIorder<T>,
{
    type System = S;

    fn kind(&self) -> TimestepperKind {
        TimestepperKind::EulerExplicitIIorder
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
        profile!("euler explicit IIorder advance");
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

        // a <- a(t^n, x^n, v^n)
        system.state_solve_a(
            DVectorSliceMut::from(&mut *a),
            DVectorSliceMut::from(&mut *l),
            DVectorSlice::from(&*x),
            DVectorSlice::from(&*v),
            *time,
            dt,
        )?;

        // x^{n+1} <- x^n + dt * v^n
        let dx = &*v * dt;
        *x = increment_x(system, x, &dx);
        // v^{n+1} <- v^n + dt * a
        v.axpy(dt, a, T::one());
        *time += dt;

        if settings.verbose() {
            debug!("Euler explicit (second order) step to t = {}", *time);
        }

        scatter_second_order(system, &self.state, l, *time)
    }
}

/// Semi-implicit (symplectic) Euler.
///
/// The velocity is updated first, and the new velocity is used to update positions:
///  v^{n+1} = v^n + dt * a(t^n, x^n, v^n)
///  x^{n+1} = x^n + dt * v^{n+1}
#[derive(Debug)]
pub struct EulerSemiImplicit<T: RealField, S> {
    core: TimestepperCore<T, S>,
    state: SecondOrderState<T>,
}

impl<T: RealField, S> EulerSemiImplicit<T, S> {
    pub fn new(settings: TimestepperSettings<T>) -> Self {
        Self {
            core: TimestepperCore::new(settings),
            state: SecondOrderState::default(),
        }
    }
}

impl<T: RealField, S> Default for EulerSemiImplicit<T, S> {
    fn default() -> Self {
        Self::new(TimestepperSettings::default())
    }
}

impl<T, S> Timestepper<T> for EulerSemiImplicit<T, S>
where
    T: RealField,
    S: IntegrableIIorder<T>,
{
    type System = S;

    fn kind(&self) -> TimestepperKind {
        TimestepperKind::EulerSemiImplicit
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
        profile!("euler semi-implicit advance");
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

        // a <- a(t^n, x^n, v^n)
        system.state_solve_a(
            DVectorSliceMut::from(&mut *a),
            DVectorSliceMut::from(&mut *l),
            DVectorSlice::from(&*x),
            DVectorSlice::from(&*v),
            *time,
            dt,
        )?;

        // v^{n+1} <- v^n + dt * a
        v.axpy(dt, a, T::one());
        // x^{n+1} <- x^n + dt * v^{n+1}
        let dx = &*v * dt;
        *x = increment_x(system, x, &dx);
        *time += dt;

        if settings.verbose() {
            debug!("Euler semi-implicit step to t = {}", *time);
        }

        scatter_second_order(system, &self.state, l, *time)
    }
}

/// Leapfrog (velocity Verlet) scheme.
///
/// Only one acceleration solve is needed per step, since the acceleration computed at the end
/// of a step is cached and reused at the start of the next one. The cache is not tied to the
/// state of the system: if the state is modified between steps (or the system is replaced
/// by another one with the same dimensions), call `reset_acceleration_cache`, otherwise the
/// next step uses a stale acceleration.
///
/// Without a cached value, the acceleration stored in the system is used.
#[derive(Debug)]
pub struct Leapfrog<T: RealField, S> {
    core: TimestepperCore<T, S>,
    state: SecondOrderState<T>,
    a_old: Option<StateDelta<T>>,
}

impl<T: RealField, S> Leapfrog<T, S> {
    pub fn new(settings: TimestepperSettings<T>) -> Self {
        Self {
            core: TimestepperCore::new(settings),
            state: SecondOrderState::default(),
            a_old: None,
        }
    }

    /// Discards the acceleration cached by the previous step.
    pub fn reset_acceleration_cache(&mut self) {
        self.a_old = None;
    }

    /// The acceleration cached by the previous step, if any.
    pub fn cached_acceleration(&self) -> Option<&StateDelta<T>> {
        self.a_old.as_ref()
    }
}

impl<T: RealField, S> Default for Leapfrog<T, S> {
    fn default() -> Self {
        Self::new(TimestepperSettings::default())
    }
}

#[replace_float_literals(T::from_f64(literal).unwrap())]
impl<T, S> Timestepper<T> for Leapfrog<T, S>
where
    T: RealField,
    S: IntegrableIIorder<T>,
{
    type System = S;

    fn kind(&self) -> TimestepperKind {
        TimestepperKind::Leapfrog
    }

    fn core(&self) -> &TimestepperCore<T, S> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TimestepperCore<T, S> {
        &mut self.core
    }

    fn setup_state(&mut self) {
        if setup_second_order(&mut self.core, &mut self.state) {
            self.a_old = None;
        }
    }

    fn invalidate_caches(&mut self) {
        self.reset_acceleration_cache();
    }

    fn second_order_state(&self) -> Option<&SecondOrderState<T>> {
        Some(&self.state)
    }

    fn advance(&mut self, dt: T) -> Result<(), Box<dyn Error>> {
        profile!("leapfrog advance");
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
        let a_old = match self.a_old.take() {
            Some(a_old) => a_old,
            None => {
                let mut a_old = StateDelta::zeros(v.len());
                system.state_gather_acceleration(DVectorSliceMut::from(&mut a_old));
                a_old
            }
        };

        // x^{n+1} <- x^n + dt * v^n + dt^2 / 2 * a^n
        let dx = &*v * dt + &a_old * (0.5 * dt * dt);
        *x = increment_x(system, x, &dx);
        // v^{n+1/2} <- v^n + dt / 2 * a^n
        v.axpy(0.5 * dt, &a_old, 1.0);

        // a^{n+1} <- a(t^{n+1}, x^{n+1}, v^{n+1/2})
        system.state_solve_a(
            DVectorSliceMut::from(&mut *a),
            DVectorSliceMut::from(&mut *l),
            DVectorSlice::from(&*x),
            DVectorSlice::from(&*v),
            *time + dt,
            dt,
        )?;

        // v^{n+1} <- v^{n+1/2} + dt / 2 * a^{n+1}
        v.axpy(0.5 * dt, a, 1.0);
        self.a_old = Some(a.clone());
        *time += dt;

        if settings.verbose() {
            debug!("Leapfrog step to t = {}", *time);
        }

        scatter_second_order(system, &self.state, l, *time)
    }
}
