use nalgebra::{DVectorSlice, DVectorSliceMut, RealField};
use std::error::Error;

mod first_order_view;

pub use first_order_view::{FirstOrderView, IntoFirstOrder};

/// An abstract system represented by a first-order ODE (possibly with constraints).
///
/// The state is an opaque vector `y` of dimension `num_coords_y`, and its time derivative
/// lives in a (possibly smaller) tangent space of dimension `num_coords_dy`:
///
/// ```ignore
///    dy/dt = g(t, y),
/// ```
///
/// where the increment `y + dy` is computed by `state_increment`.
pub trait Integrable<T: RealField> {
    /// Number of coordinates of the state `y`.
    fn num_coords_y(&self) -> usize;

    /// Number of coordinates of the state derivative `dy/dt`.
    fn num_coords_dy(&self) -> usize;

    /// Number of scalar constraints, i.e. the number of Lagrange multipliers.
    fn num_constraints(&self) -> usize;

    /// Copy the current state of the system into `y`.
    fn state_gather(&mut self, y: DVectorSliceMut<T>);

    /// Store the state `y` at time `t` in the system.
    fn state_scatter(&mut self, y: DVectorSlice<T>, t: T) -> Result<(), Box<dyn Error>>;

    /// Store the state derivative in the system, for later inspection.
    fn state_scatter_derivative(&mut self, _dydt: DVectorSlice<T>) {}

    /// Store the Lagrange multipliers in the system, for later inspection.
    fn state_scatter_reactions(&mut self, _l: DVectorSlice<T>) {}

    /// Compute `y_new = y + dy`.
    ///
    /// The default implementation is plain vector addition, which requires `y` and `dy` to have
    /// the same dimension. Systems with non-minimal coordinates must override this.
    fn state_increment(&mut self, mut y_new: DVectorSliceMut<T>, y: DVectorSlice<T>, dy: DVectorSlice<T>) {
        assert_eq!(y.len(), dy.len(), "state and increment dimensions differ");
        y_new.copy_from(&y);
        y_new.axpy(T::one(), &dy, T::one());
    }

    /// Evaluate the state derivative `dydt = g(t, y)` and the constraint reactions `l`.
    ///
    /// The state `y` is not necessarily the state currently stored in the system.
    fn state_solve(
        &mut self,
        dydt: DVectorSliceMut<T>,
        l: DVectorSliceMut<T>,
        y: DVectorSlice<T>,
        t: T,
        dt: T,
    ) -> Result<(), Box<dyn Error>>;
}

/// Coefficients of the linear combination
///
/// ```ignore
///    G = mass * M + dfdv * dF/dv + dfdx * dF/dx
/// ```
///
/// used as the upper-left block of the linear systems solved by implicit schemes.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CorrectionFactors<T> {
    pub mass: T,
    pub dfdv: T,
    pub dfdx: T,
}

impl<T> CorrectionFactors<T> {
    pub fn new(mass: T, dfdv: T, dfdx: T) -> Self {
        Self { mass, dfdv, dfdx }
    }
}

/// An abstract mechanical system represented by a second-order DAE.
///
/// The system is given by
///
/// ```ignore
///    M dv/dt = F(t, x, v) + Cq(x)^T L,
///      dx/dt = v,
///    C(x, t) = 0,
/// ```
///
/// where `L` are the Lagrange multipliers of the constraints `C`. The position `x` may have
/// more coordinates than the velocity `v` (e.g. quaternions for rotations), in which case
/// `state_increment_x` must be overridden.
pub trait IntegrableIIorder<T: RealField> {
    /// Number of position coordinates.
    fn num_coords_x(&self) -> usize;

    /// Number of velocity coordinates. Accelerations share this dimension.
    fn num_coords_v(&self) -> usize;

    /// Number of scalar constraints, i.e. the number of Lagrange multipliers.
    fn num_constraints(&self) -> usize;

    /// Copy the current positions and velocities of the system into `x` and `v`.
    fn state_gather(&mut self, x: DVectorSliceMut<T>, v: DVectorSliceMut<T>);

    /// Store positions `x` and velocities `v` at time `t` in the system.
    ///
    /// Subsequent calls to the residual and constraint loaders are evaluated at this state.
    fn state_scatter(&mut self, x: DVectorSlice<T>, v: DVectorSlice<T>, t: T) -> Result<(), Box<dyn Error>>;

    /// Copy the acceleration stored in the system into `a`.
    fn state_gather_acceleration(&mut self, a: DVectorSliceMut<T>);

    /// Store the acceleration `a` in the system.
    fn state_scatter_acceleration(&mut self, a: DVectorSlice<T>);

    /// Store the Lagrange multipliers in the system, for later inspection.
    fn state_scatter_reactions(&mut self, _l: DVectorSlice<T>) {}

    /// Compute `x_new = x + dx`, where `dx` lives in the velocity space.
    fn state_increment_x(&mut self, mut x_new: DVectorSliceMut<T>, x: DVectorSlice<T>, dx: DVectorSlice<T>) {
        assert_eq!(x.len(), dx.len(), "position and increment dimensions differ");
        x_new.copy_from(&x);
        x_new.axpy(T::one(), &dx, T::one());
    }

    /// Solve for the acceleration `a` and the reactions `l` at the given state.
    ///
    /// Used by explicit schemes. The state is not necessarily the one stored in the system.
    fn state_solve_a(
        &mut self,
        a: DVectorSliceMut<T>,
        l: DVectorSliceMut<T>,
        x: DVectorSlice<T>,
        v: DVectorSlice<T>,
        t: T,
        dt: T,
    ) -> Result<(), Box<dyn Error>>;

    /// Accumulate `r = r + c * F`, with `F` evaluated at the stored state.
    fn load_residual_f(&mut self, r: DVectorSliceMut<T>, c: T);

    /// Accumulate `r = r + c * M * w`.
    fn load_residual_mv(&mut self, r: DVectorSliceMut<T>, w: DVectorSlice<T>, c: T);

    /// Accumulate `r = r + c * Cq^T * l`, with `Cq` evaluated at the stored state.
    fn load_residual_cql(&mut self, r: DVectorSliceMut<T>, l: DVectorSlice<T>, c: T);

    /// Accumulate `qc = qc + c * C`, with `C` evaluated at the stored state.
    fn load_constraint_c(&mut self, qc: DVectorSliceMut<T>, c: T);

    /// Accumulate `qc = qc + c * dC/dt`. Scleronomic systems can rely on the default no-op.
    fn load_constraint_ct(&mut self, _qc: DVectorSliceMut<T>, _c: T) {}

    /// Assembles and factorizes the linear system for subsequent calls to `solve_correction`.
    ///
    /// The Jacobians are evaluated at time `t` and the provided `x` and `v`.
    fn setup_correction(
        &mut self,
        factors: CorrectionFactors<T>,
        x: DVectorSlice<T>,
        v: DVectorSlice<T>,
        t: T,
    ) -> Result<(), Box<dyn Error>>;

    /// Solve the saddle point system prepared by the latest `setup_correction`.
    ///
    /// Specifically, solve
    ///
    /// ```ignore
    /// | G    Cq^T | |  dv |   |  r  |
    /// | Cq   0    | | -dl | = | -qc |
    /// ```
    ///
    /// where `G = factors.mass * M + factors.dfdv * dF/dv + factors.dfdx * dF/dx`.
    fn solve_correction(
        &mut self,
        dv: DVectorSliceMut<T>,
        dl: DVectorSliceMut<T>,
        r: DVectorSlice<T>,
        qc: DVectorSlice<T>,
    ) -> Result<(), Box<dyn Error>>;
}
