use std::error::Error;

use coarse_prof::profile;
use log::debug;
use nalgebra::{DVectorSlice, DVectorSliceMut, RealField};
use numeric_literals::replace_float_literals;

use crate::integrable::Integrable;
use crate::integrators::{check_step_size, missing_integrable, scatter_first_order, setup_first_order};
use crate::state::{FirstOrderState, State, StateDelta};
use crate::timestepper::{Timestepper, TimestepperCore, TimestepperKind, TimestepperSettings};

/// Returns `y + h * dydt`, computed through the system's own increment.
fn increment<T, S>(system: &mut S, y: &State<T>, dydt: &StateDelta<T>, h: T) -> State<T>
where
    T: RealField,
    S: Integrable<T>,
{
    let mut y_new = State::zeros(y.len());
    let dy = dydt * h;
    system.state_increment(
        DVectorSliceMut::from(&mut y_new),
        DVectorSlice::from(y),
        DVectorSlice::from(&dy),
    );
    y_new
}

/// Forward Euler for first-order systems.
///
/// First order accurate:
///  y^{n+1} = y^n + dt * g(t^n, y^n)
#[derive(Debug)]
pub struct EulerExplicit<T: RealField, S> {
    core: TimestepperCore<T, S>,
    state: FirstOrderState<T>,
}

impl<T: RealField, S> EulerExplicit<T, S> {
    pub fn new(settings: TimestepperSettings<T>) -> Self {
        Self {
            core: TimestepperCore::new(settings),
            state: FirstOrderState::default(),
        }
    }
}

impl<T: RealField, S> Default for EulerExplicit<T, S> {
    fn default() -> Self {
        Self::new(TimestepperSettings::default())
    }
}

impl<T, S> Timestepper<T> for EulerExplicit<T, S>
where
    T: RealField,
    S: Integrable<T>,
{
    type System = S;

    fn kind(&self) -> TimestepperKind {
        TimestepperKind::EulerExplicit
    }

    fn core(&self) -> &TimestepperCore<T, S> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TimestepperCore<T, S> {
        &mut self.core
    }

    fn setup_state(&mut self) {
        setup_first_order(&mut self.core, &mut self.state);
    }

    fn first_order_state(&self) -> Option<&FirstOrderState<T>> {
        Some(&self.state)
    }

    fn advance(&mut self, dt: T) -> Result<(), Box<dyn Error>> {
        profile!("euler explicit advance");
        check_step_size(dt)?;
        self.setup_state();

        let TimestepperCore {
            integrable,
            time,
            l,
            settings,
        } = &mut self.core;
        let system = integrable.as_mut().ok_or_else(missing_integrable)?;
        let FirstOrderState { y, dydt } = &mut self.state;

        system.state_gather(DVectorSliceMut::from(&mut *y));

        // dydt <- g(t^n, y^n)
        system.state_solve(
            DVectorSliceMut::from(&mut *dydt),
            DVectorSliceMut::from(&mut *l),
            DVectorSlice::from(&*y),
            *time,
            dt,
        )?;

        // y^{n+1} <- y^n + dt * dydt
        *y = increment(system, y, dydt, dt);
        *time += dt;

        if settings.verbose() {
            debug!("Euler explicit step to t = {}", *time);
        }

        scatter_first_order(system, &self.state, l, *time)
    }
}

/// Classical 4-stage Runge-Kutta method.
///
/// After a step, the stored derivative is the one of the last stage.
#[derive(Debug)]
pub struct RungeKutta4<T: RealField, S> {
    core: TimestepperCore<T, S>,
    state: FirstOrderState<T>,
}

impl<T: RealField, S> RungeKutta4<T, S> {
    pub fn new(settings: TimestepperSettings<T>) -> Self {
        Self {
            core: TimestepperCore::new(settings),
            state: FirstOrderState::default(),
        }
    }
}

impl<T: RealField, S> Default for RungeKutta4<T, S> {
    fn default() -> Self {
        Self::new(TimestepperSettings::default())
    }
}

#[replace_float_literals(T::from_f64(literal).unwrap())]
impl<T, S> Timestepper<T> for RungeKutta4<T, S>
where
    T: RealField,
    S: Integrable<T>,
{
    type System = S;

    fn kind(&self) -> TimestepperKind {
        TimestepperKind::RungeKutta4
    }

    fn core(&self) -> &TimestepperCore<T, S> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TimestepperCore<T, S> {
        &mut self.core
    }

    fn setup_state(&mut self) {
        setup_first_order(&mut self.core, &mut self.state);
    }

    fn first_order_state(&self) -> Option<&FirstOrderState<T>> {
        Some(&self.state)
    }

    fn advance(&mut self, dt: T) -> Result<(), Box<dyn Error>> {
        profile!("runge kutta 4 advance");
        check_step_size(dt)?;
        self.setup_state();

        let TimestepperCore {
            integrable,
            time,
            l,
            settings,
        } = &mut self.core;
        let system = integrable.as_mut().ok_or_else(missing_integrable)?;
        let FirstOrderState { y, dydt } = &mut self.state;
        let t = *time;
        let half_dt = 0.5 * dt;

        system.state_gather(DVectorSliceMut::from(&mut *y));

        let mut dydt1 = StateDelta::zeros(dydt.len());
        let mut dydt2 = StateDelta::zeros(dydt.len());
        let mut dydt3 = StateDelta::zeros(dydt.len());
        let mut dydt4 = StateDelta::zeros(dydt.len());

        // dydt1 <- g(t^n, y^n)
        system.state_solve(
            DVectorSliceMut::from(&mut dydt1),
            DVectorSliceMut::from(&mut *l),
            DVectorSlice::from(&*y),
            t,
            dt,
        )?;

        // dydt2 <- g(t^n + dt / 2, y^n + dt / 2 * dydt1)
        let y_tmp = increment(system, y, &dydt1, half_dt);
        system.state_solve(
            DVectorSliceMut::from(&mut dydt2),
            DVectorSliceMut::from(&mut *l),
            DVectorSlice::from(&y_tmp),
            t + half_dt,
            half_dt,
        )?;

        // dydt3 <- g(t^n + dt / 2, y^n + dt / 2 * dydt2)
        let y_tmp = increment(system, y, &dydt2, half_dt);
        system.state_solve(
            DVectorSliceMut::from(&mut dydt3),
            DVectorSliceMut::from(&mut *l),
            DVectorSlice::from(&y_tmp),
            t + half_dt,
            half_dt,
        )?;

        // dydt4 <- g(t^n + dt, y^n + dt * dydt3)
        let y_tmp = increment(system, y, &dydt3, dt);
        system.state_solve(
            DVectorSliceMut::from(&mut dydt4),
            DVectorSliceMut::from(&mut *l),
            DVectorSlice::from(&y_tmp),
            t + dt,
            dt,
        )?;

        // y^{n+1} <- y^n + dt / 6 * (dydt1 + 2 dydt2 + 2 dydt3 + dydt4)
        let weighted = &dydt1 + &dydt2 * 2.0 + &dydt3 * 2.0 + &dydt4;
        *y = increment(system, y, &weighted, dt / 6.0);
        *dydt = dydt4;
        *time = t + dt;

        if settings.verbose() {
            debug!("Runge-Kutta 4 step to t = {}", *time);
        }

        scatter_first_order(system, &self.state, l, *time)
    }
}

/// Heun's method: an explicit Euler predictor followed by a trapezoidal corrector.
///
/// After a step, the stored derivative is the one of the corrector stage.
#[derive(Debug)]
pub struct Heun<T: RealField, S> {
    core: TimestepperCore<T, S>,
    state: FirstOrderState<T>,
}

impl<T: RealField, S> Heun<T, S> {
    pub fn new(settings: TimestepperSettings<T>) -> Self {
        Self {
            core: TimestepperCore::new(settings),
            state: FirstOrderState::default(),
        }
    }
}

impl<T: RealField, S> Default for Heun<T, S> {
    fn default() -> Self {
        Self::new(TimestepperSettings::default())
    }
}

#[replace_float_literals(T::from_f64(literal).unwrap())]
impl<T, S> Timestepper<T> for Heun<T, S>
where
    T: RealField,
    S: Integrable<T>,
{
    type System = S;

    fn kind(&self) -> TimestepperKind {
        TimestepperKind::Heun
    }

    fn core(&self) -> &TimestepperCore<T, S> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TimestepperCore<T, S> {
        &mut self.core
    }

    fn setup_state(&mut self) {
        setup_first_order(&mut self.core, &mut self.state);
    }

    fn first_order_state(&self) -> Option<&FirstOrderState<T>> {
        Some(&self.state)
    }

    fn advance(&mut self, dt: T) -> Result<(), Box<dyn Error>> {
        profile!("heun advance");
        check_step_size(dt)?;
        self.setup_state();

        let TimestepperCore {
            integrable,
            time,
            l,
            settings,
        } = &mut self.core;
        let system = integrable.as_mut().ok_or_else(missing_integrable)?;
        let FirstOrderState { y, dydt } = &mut self.state;
        let t = *time;

        system.state_gather(DVectorSliceMut::from(&mut *y));

        let mut dydt1 = StateDelta::zeros(dydt.len());
        let mut dydt2 = StateDelta::zeros(dydt.len());

        // Predictor: dydt1 <- g(t^n, y^n)
        system.state_solve(
            DVectorSliceMut::from(&mut dydt1),
            DVectorSliceMut::from(&mut *l),
            DVectorSlice::from(&*y),
            t,
            dt,
        )?;

        // Corrector: dydt2 <- g(t^n + dt, y^n + dt * dydt1)
        let y_tmp = increment(system, y, &dydt1, dt);
        system.state_solve(
            DVectorSliceMut::from(&mut dydt2),
            DVectorSliceMut::from(&mut *l),
            DVectorSlice::from(&y_tmp),
            t + dt,
            dt,
        )?;

        // y^{n+1} <- y^n + dt / 2 * (dydt1 + dydt2)
        let averaged = &dydt1 + &dydt2;
        *y = increment(system, y, &averaged, dt * 0.5);
        *dydt = dydt2;
        *time = t + dt;

        if settings.verbose() {
            debug!("Heun step to t = {}", *time);
        }

        scatter_first_order(system, &self.state, l, *time)
    }
}
