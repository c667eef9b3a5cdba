use itertools::izip;
use nalgebra::{DVector, RealField, Scalar};

/// Generalized position-like state of a system.
pub type State<T> = DVector<T>;

/// Increment-like state of a system: velocities, accelerations and derivatives.
///
/// The dimension of a `StateDelta` is the dimension of the tangent space of the corresponding
/// `State`, which may be smaller than the dimension of the state itself.
pub type StateDelta<T> = DVector<T>;

/// State owned by first-order timesteppers.
#[derive(Debug, Clone, PartialEq)]
pub struct FirstOrderState<T: Scalar> {
    pub(crate) y: State<T>,
    pub(crate) dydt: StateDelta<T>,
}

impl<T: RealField> Default for FirstOrderState<T> {
    fn default() -> Self {
        Self {
            y: State::zeros(0),
            dydt: StateDelta::zeros(0),
        }
    }
}

impl<T: RealField> FirstOrderState<T> {
    /// The state at the current time.
    pub fn y(&self) -> &State<T> {
        &self.y
    }

    /// The derivative of the state at the current time.
    pub fn dydt(&self) -> &StateDelta<T> {
        &self.dydt
    }

    /// Re-dimensions the state, returning `true` if any dimension changed.
    ///
    /// Vectors whose dimension changes are reset to zero.
    pub(crate) fn resize(&mut self, num_coords_y: usize, num_coords_dy: usize) -> bool {
        let changed_y = resize_zeroed(&mut self.y, num_coords_y);
        let changed_dy = resize_zeroed(&mut self.dydt, num_coords_dy);
        changed_y || changed_dy
    }
}

/// State owned by second-order timesteppers: positions, velocities and accelerations.
///
/// `v` and `a` always share the same dimension, whereas `x` may be larger.
#[derive(Debug, Clone, PartialEq)]
pub struct SecondOrderState<T: Scalar> {
    pub(crate) x: State<T>,
    pub(crate) v: StateDelta<T>,
    pub(crate) a: StateDelta<T>,
}

impl<T: RealField> Default for SecondOrderState<T> {
    fn default() -> Self {
        Self {
            x: State::zeros(0),
            v: StateDelta::zeros(0),
            a: StateDelta::zeros(0),
        }
    }
}

impl<T: RealField> SecondOrderState<T> {
    /// Positions at the current time.
    pub fn x(&self) -> &State<T> {
        &self.x
    }

    /// Velocities at the current time.
    pub fn v(&self) -> &StateDelta<T> {
        &self.v
    }

    /// Accelerations at the current time.
    pub fn a(&self) -> &StateDelta<T> {
        &self.a
    }

    /// Re-dimensions the state, returning `true` if any dimension changed.
    ///
    /// Vectors whose dimension changes are reset to zero.
    pub(crate) fn resize(&mut self, num_coords_x: usize, num_coords_v: usize) -> bool {
        let changed_x = resize_zeroed(&mut self.x, num_coords_x);
        let changed_v = resize_zeroed(&mut self.v, num_coords_v);
        let changed_a = resize_zeroed(&mut self.a, num_coords_v);
        changed_x || changed_v || changed_a
    }
}

fn resize_zeroed<T: RealField>(vector: &mut DVector<T>, dim: usize) -> bool {
    if vector.len() == dim {
        false
    } else {
        *vector = DVector::zeros(dim);
        true
    }
}

/// Weighted root-mean-square norm of the increment `dx` relative to `x`.
///
/// Each component is weighted by `1 / (rel_tol * |x_i| + abs_tol)`, so that a value below one
/// means that the increment is within tolerance. The norm of an empty vector is zero.
pub(crate) fn wrms_norm<T: RealField>(dx: &DVector<T>, x: &DVector<T>, rel_tol: T, abs_tol: T) -> T {
    assert_eq!(dx.len(), x.len());
    if dx.len() == 0 {
        return T::zero();
    }

    let sum = izip!(dx.iter(), x.iter()).fold(T::zero(), |sum, (dx_i, x_i)| {
        let e = *dx_i / (rel_tol * x_i.abs() + abs_tol);
        sum + e * e
    });
    let n = T::from_usize(dx.len()).expect("dimension must fit in T");
    (sum / n).sqrt()
}
