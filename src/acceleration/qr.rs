//! Incremental QR factorization of the (preconditioned) residual differences.
//!
//! Columns are stored in an index-addressed arena, oldest first. Appending a
//! column orthogonalizes it against `Q` with two passes of modified
//! Gram-Schmidt; deleting column `i` removes it from `R` and restores the
//! triangular shape with Givens rotations, which are applied to `Q` as well.

use crate::acceleration::filter::Filter;
use crate::coupling_error::CouplingError;
use crate::debug_invariants::DebugInvariants;
use nalgebra::{DMatrix, DVector};

/// A column is rejected when less than this fraction of its norm is new.
const REJECT_RATIO: f64 = 1e-13;

/// Tolerance of the orthonormality check in [`DebugInvariants`].
const ORTHO_TOL: f64 = 1e-8;

#[derive(Clone, Debug)]
pub struct QrFactorization {
    rows: usize,
    q: Vec<DVector<f64>>,
    r: DMatrix<f64>,
    col_norms: Vec<f64>,
}

impl QrFactorization {
    pub fn new(rows: usize) -> Self {
        Self {
            rows,
            q: Vec::new(),
            r: DMatrix::zeros(0, 0),
            col_norms: Vec::new(),
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.q.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }

    /// Upper triangular factor, `cols x cols`.
    pub fn r(&self) -> &DMatrix<f64> {
        &self.r
    }

    /// Orthonormal basis vectors, one per column.
    pub fn q(&self) -> &[DVector<f64>] {
        &self.q
    }

    /// Norm of column `i` as it was inserted.
    pub fn column_norm(&self, i: usize) -> f64 {
        self.col_norms[i]
    }

    /// Drops every column and sets a new row count.
    pub fn reset(&mut self, rows: usize) {
        *self = Self::new(rows);
    }

    /// Appends `v` as the newest column. Returns `false` (and leaves the
    /// factorization untouched) if `v` is numerically in the span of `Q`.
    ///
    /// # Panics
    /// Panics if `v` has the wrong length.
    pub fn insert_column(&mut self, v: DVector<f64>) -> bool {
        assert_eq!(v.len(), self.rows, "QR column has wrong length");
        let norm = v.norm();
        let k = self.cols();
        let mut coeffs = DVector::zeros(k);
        let mut u = v;
        for _ in 0..2 {
            for (j, qj) in self.q.iter().enumerate() {
                let h = qj.dot(&u);
                coeffs[j] += h;
                u.axpy(-h, qj, 1.0);
            }
        }
        let rho = u.norm();
        if norm == 0.0 || rho <= REJECT_RATIO * norm {
            return false;
        }

        let mut r = DMatrix::zeros(k + 1, k + 1);
        r.view_mut((0, 0), (k, k)).copy_from(&self.r);
        r.view_mut((0, k), (k, 1)).copy_from(&coeffs);
        r[(k, k)] = rho;
        self.r = r;
        self.q.push(u / rho);
        self.col_norms.push(norm);
        self.debug_assert_invariants();
        true
    }

    /// Removes column `i`, keeping the remaining columns in order.
    ///
    /// # Panics
    /// Panics if `i` is out of range.
    pub fn delete_column(&mut self, i: usize) {
        let k = self.cols();
        assert!(i < k, "QR column {i} out of range ({k} columns)");
        let mut r = self.r.clone().remove_column(i);
        for j in i..k - 1 {
            let (c, s) = givens(r[(j, j)], r[(j + 1, j)]);
            for col in j..k - 1 {
                let (x, y) = (r[(j, col)], r[(j + 1, col)]);
                r[(j, col)] = c * x + s * y;
                r[(j + 1, col)] = c * y - s * x;
            }
            r[(j + 1, j)] = 0.0;
            let (qa, qb) = (&self.q[j], &self.q[j + 1]);
            let new_a = qa * c + qb * s;
            let new_b = qb * c - qa * s;
            self.q[j] = new_a;
            self.q[j + 1] = new_b;
        }
        self.r = r.remove_row(k - 1);
        self.q.pop();
        self.col_norms.remove(i);
        self.debug_assert_invariants();
    }

    /// Refactorizes from scratch. Returns the (ascending) indices of
    /// `columns` that were rejected as linearly dependent.
    pub fn rebuild(&mut self, columns: &[DVector<f64>]) -> Vec<usize> {
        self.reset(self.rows);
        columns
            .iter()
            .enumerate()
            .filter(|(_, c)| !self.insert_column((*c).clone()))
            .map(|(i, _)| i)
            .collect()
    }

    /// Removes columns until `filter` is satisfied. Returns the removed
    /// positions in removal order (each relative to the columns left at the
    /// time of its removal).
    pub fn apply_filter(&mut self, filter: &Filter) -> Vec<usize> {
        let mut removed = Vec::new();
        while let Some(i) = filter.most_redundant(self) {
            self.delete_column(i);
            removed.push(i);
        }
        if !removed.is_empty() {
            log::debug!("filter removed columns {removed:?}, {} left", self.cols());
        }
        removed
    }

    /// Least-squares coefficients `alpha` with `R alpha = -Q^T r`.
    /// `None` if there are no columns or `R` is singular.
    pub fn solve(&self, residual: &DVector<f64>) -> Option<DVector<f64>> {
        if self.is_empty() {
            return None;
        }
        let rhs = DVector::from_iterator(self.cols(), self.q.iter().map(|q| -q.dot(residual)));
        self.r.solve_upper_triangular(&rhs)
    }
}

/// Rotation `(c, s)` with `c a + s b = hypot(a, b)` and `c b - s a = 0`.
fn givens(a: f64, b: f64) -> (f64, f64) {
    let rho = a.hypot(b);
    if rho == 0.0 { (1.0, 0.0) } else { (a / rho, b / rho) }
}

impl DebugInvariants for QrFactorization {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "QrFactorization");
    }

    fn validate_invariants(&self) -> Result<(), CouplingError> {
        let k = self.cols();
        if self.r.shape() != (k, k) || self.col_norms.len() != k {
            return Err(CouplingError::InvalidConfiguration(format!(
                "QR shape mismatch: {k} basis vectors, R {:?}, {} norms",
                self.r.shape(),
                self.col_norms.len()
            )));
        }
        for i in 0..k {
            for j in 0..i {
                if self.r[(i, j)] != 0.0 {
                    return Err(CouplingError::InvalidConfiguration(format!(
                        "R is not upper triangular at ({i}, {j})"
                    )));
                }
            }
            for j in 0..=i {
                let expected = if i == j { 1.0 } else { 0.0 };
                let dot = self.q[i].dot(&self.q[j]);
                if (dot - expected).abs() > ORTHO_TOL {
                    return Err(CouplingError::InvalidConfiguration(format!(
                        "Q is not orthonormal: q{i}.q{j} = {dot}"
                    )));
                }
            }
        }
        Ok(())
    }
}
