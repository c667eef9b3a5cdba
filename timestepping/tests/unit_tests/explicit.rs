use approx::assert_relative_eq;
use nalgebra::{DMatrix, DVector};
use timestepping::integrators::{EulerExplicit, EulerExplicitIIorder, EulerSemiImplicit, Heun, Leapfrog, RungeKutta4};
use timestepping::Timestepper;

use crate::assert_approx_matrix_eq;
use crate::utils::{ExponentialSystem, LinearMechanicalSystem};

fn scalar(value: f64) -> DVector<f64> {
    DVector::from_element(1, value)
}

/// Two uncoupled oscillators with different frequencies, with consistent initial acceleration.
fn two_oscillators() -> LinearMechanicalSystem {
    LinearMechanicalSystem::oscillator(&[1.0, 1.0], &[1.0, 9.0])
        .with_state(DVector::from_vec(vec![1.0, 0.5]), DVector::zeros(2))
        .with_consistent_acceleration()
}

#[test]
fn euler_explicit_reproduces_discrete_exponential() {
    let (k, dt, n) = (-0.5, 0.1, 20);
    let y0 = DVector::from_vec(vec![1.0, -2.0, 0.25]);
    let mut stepper = EulerExplicit::<f64, _>::default().with_integrable(ExponentialSystem::new(k, y0.clone()));

    for _ in 0..n {
        stepper.advance(dt).unwrap();
    }

    let expected = &y0 * (1.0 + k * dt).powi(n);
    let system = stepper.integrable().unwrap();
    for (y_i, expected_i) in system.y.iter().zip(expected.iter()) {
        assert_relative_eq!(*y_i, *expected_i, max_relative = 1e-12);
    }
    assert_relative_eq!(system.t, 2.0, epsilon = 1e-12);
    assert_relative_eq!(stepper.time(), 2.0, epsilon = 1e-12);

    // The stored derivative is the one evaluated at the start of the last step
    let state = stepper.first_order_state().unwrap();
    let dydt_expected = &y0 * (k * (1.0 + k * dt).powi(n - 1));
    assert_approx_matrix_eq!(state.dydt(), &dydt_expected, abstol = 1e-12);
    assert_approx_matrix_eq!(&system.dydt, state.dydt(), abstol = 0.0);
}

fn runge_kutta4_error(dt: f64) -> f64 {
    let system = ExponentialSystem::new(1.0, scalar(1.0));
    let mut stepper = RungeKutta4::<f64, _>::default().with_integrable(system);
    stepper.advance(dt).unwrap();
    (stepper.integrable().unwrap().y[0] - dt.exp()).abs()
}

#[test]
fn runge_kutta4_local_error_is_fifth_order() {
    let ratio = runge_kutta4_error(0.1) / runge_kutta4_error(0.05);
    assert!(ratio > 30.0 && ratio < 34.0, "error ratio: {}", ratio);
}

#[test]
fn runge_kutta4_reports_last_stage_derivative() {
    let dt = 0.2;
    let system = ExponentialSystem::new(1.0, scalar(1.0));
    let mut stepper = RungeKutta4::<f64, _>::default().with_integrable(system);
    stepper.advance(dt).unwrap();

    let k1 = 1.0;
    let k2 = 1.0 + 0.5 * dt * k1;
    let k3 = 1.0 + 0.5 * dt * k2;
    let k4 = 1.0 + dt * k3;
    let y_expected = 1.0 + dt / 6.0 * (k1 + 2.0 * k2 + 2.0 * k3 + k4);

    assert_relative_eq!(stepper.integrable().unwrap().y[0], y_expected, epsilon = 1e-14);
    assert_relative_eq!(stepper.first_order_state().unwrap().dydt()[0], k4, epsilon = 1e-14);
    assert_relative_eq!(stepper.integrable().unwrap().dydt[0], k4, epsilon = 1e-14);
}

#[test]
fn heun_step_mock() {
    let (k, dt) = (-2.0, 0.1);
    let system = ExponentialSystem::new(k, DVector::from_vec(vec![1.0, 3.0]));
    let mut stepper = Heun::<f64, _>::default().with_integrable(system);
    stepper.advance(dt).unwrap();

    // y^{n+1} = (1 + k dt + (k dt)^2 / 2) y^n
    let factor = 1.0 + k * dt + 0.5 * (k * dt).powi(2);
    let expected = DVector::from_vec(vec![factor, 3.0 * factor]);
    assert_approx_matrix_eq!(&stepper.integrable().unwrap().y, &expected, abstol = 1e-14);

    // The corrector derivative is evaluated at the predicted state
    let expected_dydt = DVector::from_vec(vec![k * (1.0 + k * dt), 3.0 * k * (1.0 + k * dt)]);
    assert_approx_matrix_eq!(stepper.first_order_state().unwrap().dydt(), &expected_dydt, abstol = 1e-14);
}

#[test]
fn explicit_euler_second_order_step_mock() {
    let dt = 0.05;
    let system = LinearMechanicalSystem::oscillator(&[2.0], &[8.0]).with_state(scalar(1.0), scalar(0.5));
    let mut stepper = EulerExplicitIIorder::<f64, _>::default().with_integrable(system);
    stepper.advance(dt).unwrap();

    // a = -K x / M = -4
    let state = stepper.second_order_state().unwrap();
    assert_approx_matrix_eq!(state.x(), &scalar(1.0 + dt * 0.5), abstol = 1e-14);
    assert_approx_matrix_eq!(state.v(), &scalar(0.5 - dt * 4.0), abstol = 1e-14);
    assert_approx_matrix_eq!(state.a(), &scalar(-4.0), abstol = 1e-14);

    let system = stepper.integrable().unwrap();
    assert_approx_matrix_eq!(&system.x, state.x(), abstol = 0.0);
    assert_approx_matrix_eq!(&system.a, state.a(), abstol = 0.0);
}

#[test]
fn semi_implicit_euler_step_mock() {
    let dt = 0.05;
    let system = LinearMechanicalSystem::oscillator(&[2.0], &[8.0]).with_state(scalar(1.0), scalar(0.5));
    let mut stepper = EulerSemiImplicit::<f64, _>::default().with_integrable(system);
    stepper.advance(dt).unwrap();

    let v_expected = 0.5 - dt * 4.0;
    let state = stepper.second_order_state().unwrap();
    assert_approx_matrix_eq!(state.v(), &scalar(v_expected), abstol = 1e-14);
    assert_approx_matrix_eq!(state.x(), &scalar(1.0 + dt * v_expected), abstol = 1e-14);
}

#[test]
fn semi_implicit_and_explicit_euler_trajectories_differ() {
    let system = LinearMechanicalSystem::oscillator(&[1.0], &[4.0]).with_state(scalar(1.0), scalar(0.0));
    let mut explicit = EulerExplicitIIorder::<f64, _>::default().with_integrable(system.clone());
    let mut semi_implicit = EulerSemiImplicit::<f64, _>::default().with_integrable(system);

    for _ in 0..10 {
        explicit.advance(0.05).unwrap();
        semi_implicit.advance(0.05).unwrap();
        assert_ne!(
            explicit.second_order_state().unwrap().x(),
            semi_implicit.second_order_state().unwrap().x()
        );
    }
}

#[test]
fn explicit_euler_reports_constraint_reactions() {
    // Two unit masses rigidly linked, the first one pushed by a unit force
    let system = LinearMechanicalSystem::new(
        DMatrix::identity(2, 2),
        DMatrix::zeros(2, 2),
        DMatrix::zeros(2, 2),
        DVector::from_vec(vec![1.0, 0.0]),
    )
    .with_constraints(DMatrix::from_row_slice(1, 2, &[1.0, -1.0]), DVector::zeros(1));
    let mut stepper = EulerExplicitIIorder::<f64, _>::default().with_integrable(system);
    stepper.advance(0.1).unwrap();

    assert_approx_matrix_eq!(
        stepper.second_order_state().unwrap().a(),
        &DVector::from_vec(vec![0.5, 0.5]),
        abstol = 1e-14
    );
    assert_approx_matrix_eq!(stepper.lagrange_multipliers(), &scalar(-0.5), abstol = 1e-14);
    assert_approx_matrix_eq!(&stepper.integrable().unwrap().reactions, &scalar(-0.5), abstol = 1e-14);
}

#[test]
fn leapfrog_step_mock() {
    let dt = 0.1;
    let system = LinearMechanicalSystem::oscillator(&[1.0], &[1.0])
        .with_state(scalar(1.0), scalar(0.0))
        .with_consistent_acceleration();
    let mut stepper = Leapfrog::<f64, _>::default().with_integrable(system);
    assert!(stepper.cached_acceleration().is_none());

    stepper.advance(dt).unwrap();

    // Velocity Verlet with a^n = -1
    let x_expected = 1.0 - 0.5 * dt * dt;
    let a_expected = -x_expected;
    let v_expected = 0.5 * dt * (-1.0 + a_expected);
    let state = stepper.second_order_state().unwrap();
    assert_approx_matrix_eq!(state.x(), &scalar(x_expected), abstol = 1e-14);
    assert_approx_matrix_eq!(state.v(), &scalar(v_expected), abstol = 1e-14);
    assert_approx_matrix_eq!(state.a(), &scalar(a_expected), abstol = 1e-14);
    assert_approx_matrix_eq!(stepper.cached_acceleration().unwrap(), &scalar(a_expected), abstol = 0.0);
}

#[test]
fn leapfrog_reuses_stale_acceleration_after_dof_permutation() {
    let dt = 0.01;
    let mut stale = Leapfrog::<f64, _>::default().with_integrable(two_oscillators());
    let mut reset = Leapfrog::<f64, _>::default().with_integrable(two_oscillators());
    stale.advance(dt).unwrap();
    reset.advance(dt).unwrap();

    stale.integrable_mut().unwrap().swap_dofs(0, 1);
    reset.integrable_mut().unwrap().swap_dofs(0, 1);
    reset.reset_acceleration_cache();

    // A new timestepper primes its cache from the (permuted) system
    let mut fresh = Leapfrog::<f64, _>::default().with_integrable(reset.integrable().unwrap().clone());

    stale.advance(dt).unwrap();
    reset.advance(dt).unwrap();
    fresh.advance(dt).unwrap();

    let x_fresh = fresh.second_order_state().unwrap().x().clone();
    assert_approx_matrix_eq!(reset.second_order_state().unwrap().x(), &x_fresh, abstol = 1e-14);

    // The permutation is not detected: the stale acceleration silently corrupts the step
    let deviation = (stale.second_order_state().unwrap().x() - &x_fresh).abs().max();
    assert!(deviation > 1e-6, "deviation: {}", deviation);
}

#[test]
fn leapfrog_cache_is_dropped_when_system_is_replaced() {
    let mut stepper = Leapfrog::<f64, _>::default().with_integrable(two_oscillators());
    stepper.advance(0.01).unwrap();
    assert!(stepper.cached_acceleration().is_some());

    stepper.set_integrable(two_oscillators());
    assert!(stepper.cached_acceleration().is_none());

    stepper.advance(0.01).unwrap();
    stepper.take_integrable();
    assert!(stepper.cached_acceleration().is_none());
}
