use std::error::Error;

use log::{info, warn};
use nalgebra::{DVector, DVectorSlice, DVectorSliceMut, RealField};

use crate::integrable::{Integrable, IntegrableIIorder};
use crate::record::TimestepperRecord;
use crate::state::{FirstOrderState, SecondOrderState, State, StateDelta};
use crate::timestepper::{Timestepper, TimestepperCore, TimestepperKind};

mod euler;
mod explicit;
mod explicit_ii;
mod newmark;
mod trapezoidal;

pub use euler::*;
pub use explicit::*;
pub use explicit_ii::*;
pub use newmark::*;
pub use trapezoidal::*;

/// Creates a timestepper of the given kind for a first-order system.
///
/// Fails if `kind` is not a first-order scheme. Second-order systems can be integrated by
/// first-order schemes through `IntoFirstOrder`.
pub fn create_first_order<T, S>(
    kind: TimestepperKind,
    system: S,
) -> Result<Box<dyn Timestepper<T, System = S>>, Box<dyn Error>>
where
    T: RealField,
    S: Integrable<T> + 'static,
{
    let timestepper: Box<dyn Timestepper<T, System = S>> = match kind {
        TimestepperKind::EulerExplicit => Box::new(EulerExplicit::<T, S>::default().with_integrable(system)),
        TimestepperKind::RungeKutta4 => Box::new(RungeKutta4::<T, S>::default().with_integrable(system)),
        TimestepperKind::Heun => Box::new(Heun::<T, S>::default().with_integrable(system)),
        _ => {
            return Err(Box::from(format!(
                "{} is not a timestepper for first-order systems",
                kind
            )))
        }
    };
    Ok(timestepper)
}

/// Creates a timestepper of the given kind for a second-order system.
///
/// Fails if `kind` is a first-order scheme.
pub fn create_second_order<T, S>(
    kind: TimestepperKind,
    system: S,
) -> Result<Box<dyn Timestepper<T, System = S>>, Box<dyn Error>>
where
    T: RealField,
    S: IntegrableIIorder<T> + 'static,
{
    let timestepper: Box<dyn Timestepper<T, System = S>> = match kind {
        TimestepperKind::EulerExplicitIIorder => {
            Box::new(EulerExplicitIIorder::<T, S>::default().with_integrable(system))
        }
        TimestepperKind::EulerSemiImplicit => Box::new(EulerSemiImplicit::<T, S>::default().with_integrable(system)),
        TimestepperKind::Leapfrog => Box::new(Leapfrog::<T, S>::default().with_integrable(system)),
        TimestepperKind::EulerImplicit => Box::new(EulerImplicit::<T, S>::default().with_integrable(system)),
        TimestepperKind::EulerImplicitLinearized => {
            Box::new(EulerImplicitLinearized::<T, S>::default().with_integrable(system))
        }
        TimestepperKind::EulerImplicitProjected => {
            Box::new(EulerImplicitProjected::<T, S>::default().with_integrable(system))
        }
        TimestepperKind::Trapezoidal => Box::new(Trapezoidal::<T, S>::default().with_integrable(system)),
        TimestepperKind::TrapezoidalLinearized => {
            Box::new(TrapezoidalLinearized::<T, S>::default().with_integrable(system))
        }
        TimestepperKind::TrapezoidalLinearized2 => {
            Box::new(TrapezoidalLinearized2::<T, S>::default().with_integrable(system))
        }
        TimestepperKind::Newmark => Box::new(Newmark::<T, S>::default().with_integrable(system)),
        TimestepperKind::EulerExplicit | TimestepperKind::RungeKutta4 | TimestepperKind::Heun => {
            return Err(Box::from(format!(
                "{} is not a timestepper for second-order systems",
                kind
            )))
        }
    };
    Ok(timestepper)
}

/// Creates a first-order timestepper of the recorded kind and applies the recorded configuration.
pub fn restore_first_order<T, S>(
    record: &TimestepperRecord<T>,
    system: S,
) -> Result<Box<dyn Timestepper<T, System = S>>, Box<dyn Error>>
where
    T: RealField,
    S: Integrable<T> + 'static,
{
    let mut timestepper = create_first_order(record.kind, system)?;
    timestepper.apply_record(record)?;
    Ok(timestepper)
}

/// Creates a second-order timestepper of the recorded kind and applies the recorded configuration.
pub fn restore_second_order<T, S>(
    record: &TimestepperRecord<T>,
    system: S,
) -> Result<Box<dyn Timestepper<T, System = S>>, Box<dyn Error>>
where
    T: RealField,
    S: IntegrableIIorder<T> + 'static,
{
    let mut timestepper = create_second_order(record.kind, system)?;
    timestepper.apply_record(record)?;
    Ok(timestepper)
}

pub(crate) fn check_step_size<T: RealField>(dt: T) -> Result<(), Box<dyn Error>> {
    if dt > T::zero() {
        Ok(())
    } else {
        Err(Box::from(format!("time step must be strictly positive, got {}", dt)))
    }
}

pub(crate) fn missing_integrable() -> Box<dyn Error> {
    Box::from("no integrable system attached to the timestepper")
}

/// Re-dimensions first-order state and multipliers to the attached system.
///
/// Returns `true` if the dimension of the state changed.
pub(crate) fn setup_first_order<T, S>(core: &mut TimestepperCore<T, S>, state: &mut FirstOrderState<T>) -> bool
where
    T: RealField,
    S: Integrable<T>,
{
    let (num_y, num_dy, num_constraints) = core.integrable.as_ref().map_or((0, 0, 0), |system| {
        (system.num_coords_y(), system.num_coords_dy(), system.num_constraints())
    });
    core.reset_multipliers(num_constraints);
    state.resize(num_y, num_dy)
}

/// Re-dimensions second-order state and multipliers to the attached system.
///
/// Returns `true` if the dimension of the state changed.
pub(crate) fn setup_second_order<T, S>(core: &mut TimestepperCore<T, S>, state: &mut SecondOrderState<T>) -> bool
where
    T: RealField,
    S: IntegrableIIorder<T>,
{
    let (num_x, num_v, num_constraints) = core.integrable.as_ref().map_or((0, 0, 0), |system| {
        (system.num_coords_x(), system.num_coords_v(), system.num_constraints())
    });
    core.reset_multipliers(num_constraints);
    state.resize(num_x, num_v)
}

/// Reports the norms of the quantities of a Newton iteration.
pub(crate) fn log_iteration<T: RealField>(
    kind: TimestepperKind,
    iteration: usize,
    r: &DVector<T>,
    qc: &DVector<T>,
    ds: &DVector<T>,
    dl: &DVector<T>,
) {
    info!(
        "{} iteration {}: |R| = {}, |Qc| = {}, |Ds| = {}, |Dl| = {}",
        kind,
        iteration,
        r.norm(),
        qc.norm(),
        ds.norm(),
        dl.norm()
    );
}

pub(crate) fn log_not_converged(kind: TimestepperKind, max_iters: usize) {
    warn!("{} did not converge within {} iterations", kind, max_iters);
}

/// Returns `x + dx`, computed through the system's own position increment.
pub(crate) fn increment_x<T, S>(system: &mut S, x: &State<T>, dx: &StateDelta<T>) -> State<T>
where
    T: RealField,
    S: IntegrableIIorder<T>,
{
    let mut x_new = State::zeros(x.len());
    system.state_increment_x(
        DVectorSliceMut::from(&mut x_new),
        DVectorSlice::from(x),
        DVectorSlice::from(dx),
    );
    x_new
}

/// Stores the final state of a step in a first-order system.
pub(crate) fn scatter_first_order<T, S>(
    system: &mut S,
    state: &FirstOrderState<T>,
    l: &DVector<T>,
    t: T,
) -> Result<(), Box<dyn Error>>
where
    T: RealField,
    S: Integrable<T>,
{
    system.state_scatter(DVectorSlice::from(&state.y), t)?;
    system.state_scatter_derivative(DVectorSlice::from(&state.dydt));
    system.state_scatter_reactions(DVectorSlice::from(l));
    Ok(())
}

/// Stores the final state of a step in a second-order system.
pub(crate) fn scatter_second_order<T, S>(
    system: &mut S,
    state: &SecondOrderState<T>,
    l: &DVector<T>,
    t: T,
) -> Result<(), Box<dyn Error>>
where
    T: RealField,
    S: IntegrableIIorder<T>,
{
    system.state_scatter(DVectorSlice::from(&state.x), DVectorSlice::from(&state.v), t)?;
    system.state_scatter_acceleration(DVectorSlice::from(&state.a));
    system.state_scatter_reactions(DVectorSlice::from(l));
    Ok(())
}
