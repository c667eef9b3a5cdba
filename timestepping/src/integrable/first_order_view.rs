use nalgebra::{DVector, DVectorSlice, DVectorSliceMut, RealField};
use std::error::Error;

use crate::integrable::{Integrable, IntegrableIIorder};

/// Wrapper for an `IntegrableIIorder` to use it as an `Integrable`, use the `IntoFirstOrder`
/// trait to construct.
///
/// The first-order state is the concatenation `y = [x; v]` and its derivative is
/// `dy/dt = [v; a]`.
#[derive(Debug, Clone)]
pub struct FirstOrderView<S> {
    system: S,
}

/// Allows to view a second-order system as a first-order system, e.g. to integrate a
/// mechanical system with Runge-Kutta.
pub trait IntoFirstOrder<T>: Sized {
    fn into_first_order(self) -> FirstOrderView<Self>;
}

impl<T, S> IntoFirstOrder<T> for S
where
    T: RealField,
    S: IntegrableIIorder<T>,
{
    fn into_first_order(self) -> FirstOrderView<S> {
        FirstOrderView { system: self }
    }
}

impl<S> FirstOrderView<S> {
    pub fn new(system: S) -> Self {
        Self { system }
    }

    pub fn inner(&self) -> &S {
        &self.system
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.system
    }

    pub fn into_inner(self) -> S {
        self.system
    }
}

impl<T, S> Integrable<T> for FirstOrderView<S>
where
    T: RealField,
    S: IntegrableIIorder<T>,
{
    fn num_coords_y(&self) -> usize {
        self.system.num_coords_x() + self.system.num_coords_v()
    }

    fn num_coords_dy(&self) -> usize {
        2 * self.system.num_coords_v()
    }

    fn num_constraints(&self) -> usize {
        IntegrableIIorder::num_constraints(&self.system)
    }

    fn state_gather(&mut self, mut y: DVectorSliceMut<T>) {
        let nx = self.system.num_coords_x();
        let nv = self.system.num_coords_v();
        // TODO: Avoid allocation
        let mut x = DVector::zeros(nx);
        let mut v = DVector::zeros(nv);
        IntegrableIIorder::state_gather(
            &mut self.system,
            DVectorSliceMut::from(&mut x),
            DVectorSliceMut::from(&mut v),
        );
        y.rows_mut(0, nx).copy_from(&x);
        y.rows_mut(nx, nv).copy_from(&v);
    }

    fn state_scatter(&mut self, y: DVectorSlice<T>, t: T) -> Result<(), Box<dyn Error>> {
        let nx = self.system.num_coords_x();
        let nv = self.system.num_coords_v();
        IntegrableIIorder::state_scatter(&mut self.system, y.rows(0, nx), y.rows(nx, nv), t)
    }

    fn state_scatter_derivative(&mut self, dydt: DVectorSlice<T>) {
        let nv = self.system.num_coords_v();
        self.system.state_scatter_acceleration(dydt.rows(nv, nv));
    }

    fn state_scatter_reactions(&mut self, l: DVectorSlice<T>) {
        IntegrableIIorder::state_scatter_reactions(&mut self.system, l);
    }

    fn state_increment(&mut self, mut y_new: DVectorSliceMut<T>, y: DVectorSlice<T>, dy: DVectorSlice<T>) {
        let nx = self.system.num_coords_x();
        let nv = self.system.num_coords_v();

        // x_new = x + dx, using the increment defined by the system
        self.system
            .state_increment_x(y_new.rows_mut(0, nx), y.rows(0, nx), dy.rows(0, nv));

        // v_new = v + dv
        let mut v_new = y_new.rows_mut(nx, nv);
        v_new.copy_from(&y.rows(nx, nv));
        v_new.axpy(T::one(), &dy.rows(nv, nv), T::one());
    }

    fn state_solve(
        &mut self,
        mut dydt: DVectorSliceMut<T>,
        l: DVectorSliceMut<T>,
        y: DVectorSlice<T>,
        t: T,
        dt: T,
    ) -> Result<(), Box<dyn Error>> {
        let nx = self.system.num_coords_x();
        let nv = self.system.num_coords_v();
        let x = y.rows(0, nx);
        let v = y.rows(nx, nv);

        // dx/dt = v
        dydt.rows_mut(0, nv).copy_from(&v);
        // dv/dt = a(t, x, v)
        self.system
            .state_solve_a(dydt.rows_mut(nv, nv), l, x, v, t, dt)
    }
}
