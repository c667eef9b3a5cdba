use nalgebra::{DMatrix, DVector, DVectorSlice, DVectorSliceMut};
use std::error::Error;
use timestepping::{CorrectionFactors, Integrable, IntegrableIIorder};

/// Poor man's approx assertion for matrices
#[macro_export]
macro_rules! assert_approx_matrix_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        // Evaluate each operand once, they are printed again on failure
        let (x, y) = ($x, $y);
        let diff = x - y;

        let max_absdiff = diff.abs().max();
        let approx_eq = max_absdiff <= $tol;

        if !approx_eq {
            println!("abstol: {}", $tol);
            println!("left: {}", x);
            println!("right: {}", y);
            println!("diff: {:e}", diff);
        }
        assert!(approx_eq);
    }};
}

/// Define the (mock) first-order system
///  dy/dt = k * y
#[derive(Debug, Clone)]
pub struct ExponentialSystem {
    pub k: f64,
    pub y: DVector<f64>,
    pub dydt: DVector<f64>,
    pub t: f64,
}

impl ExponentialSystem {
    pub fn new(k: f64, y0: DVector<f64>) -> Self {
        let dydt = DVector::zeros(y0.len());
        Self { k, y: y0, dydt, t: 0.0 }
    }
}

impl Integrable<f64> for ExponentialSystem {
    fn num_coords_y(&self) -> usize {
        self.y.len()
    }

    fn num_coords_dy(&self) -> usize {
        self.y.len()
    }

    fn num_constraints(&self) -> usize {
        0
    }

    fn state_gather(&mut self, mut y: DVectorSliceMut<f64>) {
        y.copy_from(&self.y);
    }

    fn state_scatter(&mut self, y: DVectorSlice<f64>, t: f64) -> Result<(), Box<dyn Error>> {
        self.y.copy_from(&y);
        self.t = t;
        Ok(())
    }

    fn state_scatter_derivative(&mut self, dydt: DVectorSlice<f64>) {
        self.dydt.copy_from(&dydt);
    }

    fn state_solve(
        &mut self,
        mut dydt: DVectorSliceMut<f64>,
        _l: DVectorSliceMut<f64>,
        y: DVectorSlice<f64>,
        _t: f64,
        _dt: f64,
    ) -> Result<(), Box<dyn Error>> {
        dydt.copy_from(&(y * self.k));
        Ok(())
    }
}

/// Define the (mock) constrained mechanical system
///  M dv/dt = F(x, v) + Cq^T L
///    dx/dt = v
///     C(x) = 0
/// with
///  F(x, v) = f_ext - K x - D v
///  C(x) = Cq x - c0
///
/// The saddle point systems are solved with a dense LU decomposition.
#[derive(Debug, Clone)]
pub struct LinearMechanicalSystem {
    pub mass: DMatrix<f64>,
    pub stiffness: DMatrix<f64>,
    pub damping: DMatrix<f64>,
    pub f_ext: DVector<f64>,
    pub cq: DMatrix<f64>,
    pub c0: DVector<f64>,

    pub x: DVector<f64>,
    pub v: DVector<f64>,
    pub a: DVector<f64>,
    pub t: f64,
    pub reactions: DVector<f64>,

    /// Largest absolute value of any component of Qc received by `solve_correction`.
    pub max_abs_qc: f64,
    pub num_setups: usize,
    pub num_solves: usize,
    saddle_matrix: Option<DMatrix<f64>>,
}

impl LinearMechanicalSystem {
    /// Unconstrained system at rest in the origin.
    pub fn new(mass: DMatrix<f64>, stiffness: DMatrix<f64>, damping: DMatrix<f64>, f_ext: DVector<f64>) -> Self {
        let n = mass.nrows();
        Self {
            mass,
            stiffness,
            damping,
            f_ext,
            cq: DMatrix::zeros(0, n),
            c0: DVector::zeros(0),
            x: DVector::zeros(n),
            v: DVector::zeros(n),
            a: DVector::zeros(n),
            t: 0.0,
            reactions: DVector::zeros(0),
            max_abs_qc: 0.0,
            num_setups: 0,
            num_solves: 0,
            saddle_matrix: None,
        }
    }

    /// Undamped oscillator with diagonal mass and stiffness and no external forces.
    pub fn oscillator(masses: &[f64], stiffnesses: &[f64]) -> Self {
        let n = masses.len();
        Self::new(
            DMatrix::from_diagonal(&DVector::from_column_slice(masses)),
            DMatrix::from_diagonal(&DVector::from_column_slice(stiffnesses)),
            DMatrix::zeros(n, n),
            DVector::zeros(n),
        )
    }

    pub fn with_constraints(mut self, cq: DMatrix<f64>, c0: DVector<f64>) -> Self {
        assert_eq!(cq.ncols(), self.num_dofs());
        assert_eq!(cq.nrows(), c0.len());
        self.reactions = DVector::zeros(c0.len());
        self.cq = cq;
        self.c0 = c0;
        self
    }

    pub fn with_state(mut self, x: DVector<f64>, v: DVector<f64>) -> Self {
        self.x = x;
        self.v = v;
        self
    }

    /// Stores the acceleration consistent with the current state.
    pub fn with_consistent_acceleration(mut self) -> Self {
        let n = self.num_dofs();
        let mut a = DVector::zeros(n);
        let mut l = DVector::zeros(self.cq.nrows());
        let (x, v, t) = (self.x.clone(), self.v.clone(), self.t);
        self.state_solve_a(
            DVectorSliceMut::from(&mut a),
            DVectorSliceMut::from(&mut l),
            DVectorSlice::from(&x),
            DVectorSlice::from(&v),
            t,
            0.0,
        )
        .unwrap();
        self.a = a;
        self
    }

    pub fn num_dofs(&self) -> usize {
        self.mass.nrows()
    }

    pub fn force(&self, x: &DVector<f64>, v: &DVector<f64>) -> DVector<f64> {
        &self.f_ext - &self.stiffness * x - &self.damping * v
    }

    pub fn constraint(&self, x: &DVector<f64>) -> DVector<f64> {
        &self.cq * x - &self.c0
    }

    /// Kinetic plus elastic energy of the current state.
    pub fn energy(&self) -> f64 {
        0.5 * self.v.dot(&(&self.mass * &self.v)) + 0.5 * self.x.dot(&(&self.stiffness * &self.x))
    }

    /// Exchanges two degrees of freedom, consistently permuting all data of the system.
    pub fn swap_dofs(&mut self, i: usize, j: usize) {
        for matrix in [&mut self.mass, &mut self.stiffness, &mut self.damping].iter_mut() {
            matrix.swap_rows(i, j);
            matrix.swap_columns(i, j);
        }
        for vector in [&mut self.f_ext, &mut self.x, &mut self.v, &mut self.a].iter_mut() {
            vector.swap_rows(i, j);
        }
        self.cq.swap_columns(i, j);
    }

    fn assemble_saddle_matrix(&self, g: &DMatrix<f64>) -> DMatrix<f64> {
        let n = self.num_dofs();
        let m = self.cq.nrows();
        let mut matrix = DMatrix::zeros(n + m, n + m);
        matrix.slice_mut((0, 0), (n, n)).copy_from(g);
        matrix.slice_mut((0, n), (n, m)).copy_from(&self.cq.transpose());
        matrix.slice_mut((n, 0), (m, n)).copy_from(&self.cq);
        matrix
    }

    /// Solves
    ///  | G    Cq^T | |  s |   |  r  |
    ///  | Cq   0    | | -l | = | -qc |
    fn solve_saddle(
        &self,
        matrix: &DMatrix<f64>,
        r: &DVector<f64>,
        qc: &DVector<f64>,
    ) -> Result<(DVector<f64>, DVector<f64>), Box<dyn Error>> {
        let n = self.num_dofs();
        let m = self.cq.nrows();
        let mut rhs = DVector::zeros(n + m);
        rhs.rows_mut(0, n).copy_from(r);
        rhs.rows_mut(n, m).copy_from(&(-qc));
        let solution = matrix
            .clone()
            .lu()
            .solve(&rhs)
            .ok_or_else(|| Box::<dyn Error>::from("singular saddle point matrix"))?;
        let s = DVector::from_iterator(n, solution.rows(0, n).iter().cloned());
        let l = DVector::from_iterator(m, solution.rows(n, m).iter().map(|l| -l));
        Ok((s, l))
    }
}

impl IntegrableIIorder<f64> for LinearMechanicalSystem {
    fn num_coords_x(&self) -> usize {
        self.num_dofs()
    }

    fn num_coords_v(&self) -> usize {
        self.num_dofs()
    }

    fn num_constraints(&self) -> usize {
        self.cq.nrows()
    }

    fn state_gather(&mut self, mut x: DVectorSliceMut<f64>, mut v: DVectorSliceMut<f64>) {
        x.copy_from(&self.x);
        v.copy_from(&self.v);
    }

    fn state_scatter(&mut self, x: DVectorSlice<f64>, v: DVectorSlice<f64>, t: f64) -> Result<(), Box<dyn Error>> {
        self.x.copy_from(&x);
        self.v.copy_from(&v);
        self.t = t;
        Ok(())
    }

    fn state_gather_acceleration(&mut self, mut a: DVectorSliceMut<f64>) {
        a.copy_from(&self.a);
    }

    fn state_scatter_acceleration(&mut self, a: DVectorSlice<f64>) {
        self.a.copy_from(&a);
    }

    fn state_scatter_reactions(&mut self, l: DVectorSlice<f64>) {
        self.reactions.copy_from(&l);
    }

    fn state_solve_a(
        &mut self,
        mut a: DVectorSliceMut<f64>,
        mut l: DVectorSliceMut<f64>,
        x: DVectorSlice<f64>,
        v: DVectorSlice<f64>,
        _t: f64,
        _dt: f64,
    ) -> Result<(), Box<dyn Error>> {
        let f = self.force(&x.clone_owned(), &v.clone_owned());
        let matrix = self.assemble_saddle_matrix(&self.mass);
        let qc = DVector::zeros(self.cq.nrows());
        let (a_sol, l_sol) = self.solve_saddle(&matrix, &f, &qc)?;
        a.copy_from(&a_sol);
        l.copy_from(&l_sol);
        Ok(())
    }

    fn load_residual_f(&mut self, mut r: DVectorSliceMut<f64>, c: f64) {
        let f = self.force(&self.x, &self.v);
        r.axpy(c, &f, 1.0);
    }

    fn load_residual_mv(&mut self, mut r: DVectorSliceMut<f64>, w: DVectorSlice<f64>, c: f64) {
        r.axpy(c, &(&self.mass * w), 1.0);
    }

    fn load_residual_cql(&mut self, mut r: DVectorSliceMut<f64>, l: DVectorSlice<f64>, c: f64) {
        r.axpy(c, &(self.cq.transpose() * l), 1.0);
    }

    fn load_constraint_c(&mut self, mut qc: DVectorSliceMut<f64>, c: f64) {
        let constraint = self.constraint(&self.x);
        qc.axpy(c, &constraint, 1.0);
    }

    fn setup_correction(
        &mut self,
        factors: CorrectionFactors<f64>,
        _x: DVectorSlice<f64>,
        _v: DVectorSlice<f64>,
        _t: f64,
    ) -> Result<(), Box<dyn Error>> {
        self.num_setups += 1;
        // dF/dv = -D, dF/dx = -K
        let g = &self.mass * factors.mass - &self.damping * factors.dfdv - &self.stiffness * factors.dfdx;
        self.saddle_matrix = Some(self.assemble_saddle_matrix(&g));
        Ok(())
    }

    fn solve_correction(
        &mut self,
        mut dv: DVectorSliceMut<f64>,
        mut dl: DVectorSliceMut<f64>,
        r: DVectorSlice<f64>,
        qc: DVectorSlice<f64>,
    ) -> Result<(), Box<dyn Error>> {
        self.num_solves += 1;
        self.max_abs_qc = qc.iter().fold(self.max_abs_qc, |max, q| max.max(q.abs()));
        let matrix = self
            .saddle_matrix
            .as_ref()
            .ok_or_else(|| Box::<dyn Error>::from("solve_correction called before setup_correction"))?;
        let (dv_sol, dl_sol) = self.solve_saddle(matrix, &r.clone_owned(), &qc.clone_owned())?;
        dv.copy_from(&dv_sol);
        dl.copy_from(&dl_sol);
        Ok(())
    }
}
