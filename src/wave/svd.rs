//! Complex singular value decomposition for small dense systems.
//!
//! The wave-separation systems are tall and thin (one row per probe, one column per wave
//! component), so a one-sided Jacobi (Hestenes) iteration is both simple and accurate:
//! column pairs are rotated until they are mutually orthogonal, at which point the column
//! norms are the singular values.
//!
//! For a column pair `a_p`, `a_q` with `γ = a_pᴴ·a_q = |γ|·e^{iφ}`:
//!
//! ```text
//! ζ = (‖a_q‖² − ‖a_p‖²) / (2|γ|)
//! t = sign(ζ) / (|ζ| + √(1 + ζ²)),  c = 1/√(1 + t²),  s = c·t
//! a_p' = c·a_p − s·e^{−iφ}·a_q
//! a_q' = s·e^{iφ}·a_p + c·a_q
//! ```
//!
//! The same rotation accumulated on the identity gives `V`, so `A·V = U·Σ`.

use num_complex::Complex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Double-precision complex scalar.
pub type C64 = Complex<f64>;

/// SVD failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SvdError {
    /// Matrix has no rows or no columns.
    #[error("Cannot decompose an empty matrix")]
    Empty,

    /// More columns than rows.
    #[error("Expected a tall matrix, got {rows}x{cols}")]
    WideMatrix {
        /// Row count
        rows: usize,
        /// Column count
        cols: usize,
    },

    /// NaN or infinite entry.
    #[error("Matrix contains non-finite values")]
    NonFinite,

    /// Column pairs still not orthogonal after the sweep limit.
    #[error("Jacobi SVD did not converge after {sweeps} sweeps")]
    NotConverged {
        /// Sweeps performed
        sweeps: usize,
    },
}

/// Numerical settings for the decomposition and the pseudo-inverse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvdConfig {
    /// Relative orthogonality below which a column pair is left alone
    pub tolerance: f64,
    /// Sweep limit (each sweep visits every column pair once)
    pub max_sweeps: usize,
    /// Singular values below `rcond · σ_max` are treated as zero in the pseudo-inverse
    pub rcond: f64,
}

impl Default for SvdConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-13,
            max_sweeps: 60,
            rcond: 1e-10,
        }
    }
}

impl SvdConfig {
    /// Check the settings, reporting the first problem.
    pub fn validate(&self) -> Result<(), String> {
        crate::validation::is_positive_finite(self.tolerance)
            .map_err(|e| format!("tolerance: {}", e))?;
        crate::validation::is_in_range(self.rcond, 0.0..=1.0)
            .map_err(|e| format!("rcond {}: {}", self.rcond, e))?;
        if self.max_sweeps == 0 {
            return Err("max_sweeps must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Dense row-major complex matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct ComplexMatrix {
    rows: usize,
    cols: usize,
    data: Vec<C64>,
}

impl ComplexMatrix {
    /// All-zero matrix.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![C64::new(0.0, 0.0); rows * cols],
        }
    }

    /// Identity matrix.
    pub fn identity(size: usize) -> Self {
        Self::from_fn(size, size, |r, c| {
            if r == c {
                C64::new(1.0, 0.0)
            } else {
                C64::new(0.0, 0.0)
            }
        })
    }

    /// Matrix with entries `f(row, col)`.
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> C64) -> Self {
        let data = (0..rows)
            .flat_map(|r| (0..cols).map(move |c| (r, c)))
            .map(|(r, c)| f(r, c))
            .collect();
        Self { rows, cols, data }
    }

    /// Row count.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Column count.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Entry at `(row, col)`.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> C64 {
        self.data[row * self.cols + col]
    }

    #[inline]
    fn set(&mut self, row: usize, col: usize, value: C64) {
        self.data[row * self.cols + col] = value;
    }

    /// Matrix-vector product `self · v`.
    pub fn mul_vec(&self, v: &[C64]) -> Vec<C64> {
        (0..self.rows)
            .map(|r| {
                self.data[r * self.cols..(r + 1) * self.cols]
                    .iter()
                    .zip(v)
                    .map(|(a, b)| a * b)
                    .sum()
            })
            .collect()
    }

    /// Matrix product `self · other`.
    pub fn mul(&self, other: &ComplexMatrix) -> ComplexMatrix {
        ComplexMatrix::from_fn(self.rows, other.cols, |r, c| {
            (0..self.cols).map(|k| self.get(r, k) * other.get(k, c)).sum()
        })
    }

    /// Conjugate transpose.
    pub fn adjoint(&self) -> ComplexMatrix {
        ComplexMatrix::from_fn(self.cols, self.rows, |r, c| self.get(c, r).conj())
    }

    /// Largest entry-wise distance to `other` (infinite if shapes differ).
    pub fn max_abs_diff(&self, other: &ComplexMatrix) -> f64 {
        if self.rows != other.rows || self.cols != other.cols {
            return f64::INFINITY;
        }
        self.data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| (a - b).norm())
            .fold(0.0, f64::max)
    }

    fn rotate_columns(&mut self, p: usize, q: usize, c: f64, s: f64, phase: C64) {
        for r in 0..self.rows {
            let a_p = self.get(r, p);
            let a_q = self.get(r, q);
            self.set(r, p, a_p * c - a_q * phase.conj() * s);
            self.set(r, q, a_p * phase * s + a_q * c);
        }
    }
}

/// Thin decomposition `A = U·diag(σ)·Vᴴ` with `σ` in descending order.
#[derive(Debug, Clone, PartialEq)]
pub struct Svd {
    /// Left singular vectors (`m×n`, orthonormal columns)
    pub u: ComplexMatrix,
    /// Singular values, descending
    pub singular_values: Vec<f64>,
    /// Right singular vectors (`n×n`, unitary)
    pub v: ComplexMatrix,
    /// Jacobi sweeps used
    pub sweeps: usize,
}

impl Svd {
    /// Decompose a tall (`rows >= cols`) matrix.
    pub fn decompose(matrix: &ComplexMatrix, config: &SvdConfig) -> Result<Self, SvdError> {
        let (m, n) = (matrix.rows, matrix.cols);
        if m == 0 || n == 0 {
            return Err(SvdError::Empty);
        }
        if n > m {
            return Err(SvdError::WideMatrix { rows: m, cols: n });
        }
        if matrix.data.iter().any(|z| !(z.re.is_finite() && z.im.is_finite())) {
            return Err(SvdError::NonFinite);
        }

        let mut work = matrix.clone();
        let mut v = ComplexMatrix::identity(n);
        let mut sweeps = 0;
        let mut converged = n == 1;

        while !converged && sweeps < config.max_sweeps {
            sweeps += 1;
            let mut rotated = false;
            for p in 0..n - 1 {
                for q in p + 1..n {
                    let (mut alpha, mut beta, mut gamma) = (0.0, 0.0, C64::new(0.0, 0.0));
                    for r in 0..m {
                        let a_p = work.get(r, p);
                        let a_q = work.get(r, q);
                        alpha += a_p.norm_sqr();
                        beta += a_q.norm_sqr();
                        gamma += a_p.conj() * a_q;
                    }
                    let magnitude = gamma.norm();
                    if magnitude == 0.0 || magnitude <= config.tolerance * (alpha * beta).sqrt() {
                        continue;
                    }
                    rotated = true;

                    let phase = gamma / magnitude;
                    let zeta = (beta - alpha) / (2.0 * magnitude);
                    let sign = if zeta >= 0.0 { 1.0 } else { -1.0 };
                    let t = sign / (zeta.abs() + (1.0 + zeta * zeta).sqrt());
                    let c = 1.0 / (1.0 + t * t).sqrt();
                    let s = c * t;

                    work.rotate_columns(p, q, c, s, phase);
                    v.rotate_columns(p, q, c, s, phase);
                }
            }
            converged = !rotated;
        }

        if !converged {
            return Err(SvdError::NotConverged { sweeps });
        }

        let norms: Vec<f64> = (0..n)
            .map(|c| (0..m).map(|r| work.get(r, c).norm_sqr()).sum::<f64>().sqrt())
            .collect();
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| norms[b].total_cmp(&norms[a]));

        let u = ComplexMatrix::from_fn(m, n, |r, c| {
            let source = order[c];
            if norms[source] > 0.0 {
                work.get(r, source) / norms[source]
            } else {
                C64::new(0.0, 0.0)
            }
        });
        let v = ComplexMatrix::from_fn(n, n, |r, c| v.get(r, order[c]));
        let singular_values = order.iter().map(|&i| norms[i]).collect();

        Ok(Self {
            u,
            singular_values,
            v,
            sweeps,
        })
    }

    /// `σ_max / σ_min`; infinite when the matrix is rank deficient.
    pub fn condition_number(&self) -> f64 {
        match (self.singular_values.first(), self.singular_values.last()) {
            (Some(&max), Some(&min)) if min > 0.0 => max / min,
            _ => f64::INFINITY,
        }
    }

    /// Singular values above `rcond · σ_max`.
    pub fn rank(&self, rcond: f64) -> usize {
        let cutoff = rcond * self.singular_values.first().copied().unwrap_or(0.0);
        self.singular_values.iter().filter(|&&s| s > cutoff).count()
    }

    /// Moore-Penrose pseudo-inverse `V·Σ⁺·Uᴴ` (`n×m`).
    pub fn pseudo_inverse(&self, rcond: f64) -> ComplexMatrix {
        let cutoff = rcond * self.singular_values.first().copied().unwrap_or(0.0);
        let inverse: Vec<f64> = self
            .singular_values
            .iter()
            .map(|&s| if s > cutoff && s > 0.0 { 1.0 / s } else { 0.0 })
            .collect();
        ComplexMatrix::from_fn(self.v.rows, self.u.rows, |i, r| {
            inverse
                .iter()
                .enumerate()
                .map(|(j, &inv)| self.v.get(i, j) * inv * self.u.get(r, j).conj())
                .sum()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_matrix(rows: usize, cols: usize) -> ComplexMatrix {
        ComplexMatrix::from_fn(rows, cols, |r, c| {
            let x = (r * cols + c) as f64;
            C64::new((1.3 * x + 0.7).sin(), (0.4 * x * x + 0.1).cos())
        })
    }

    fn reconstruct(svd: &Svd) -> ComplexMatrix {
        let sigma = ComplexMatrix::from_fn(svd.v.rows(), svd.v.rows(), |r, c| {
            if r == c {
                C64::new(svd.singular_values[r], 0.0)
            } else {
                C64::new(0.0, 0.0)
            }
        });
        svd.u.mul(&sigma).mul(&svd.v.adjoint())
    }

    #[test]
    fn test_reconstructs_tall_matrix() {
        for (rows, cols) in [(4, 2), (6, 3), (3, 3), (5, 1)] {
            let a = sample_matrix(rows, cols);
            let svd = Svd::decompose(&a, &SvdConfig::default()).unwrap();
            assert!(reconstruct(&svd).max_abs_diff(&a) < 1e-10);

            let identity = ComplexMatrix::identity(cols);
            assert!(svd.u.adjoint().mul(&svd.u).max_abs_diff(&identity) < 1e-10);
            assert!(svd.v.adjoint().mul(&svd.v).max_abs_diff(&identity) < 1e-10);
            assert!(svd
                .singular_values
                .windows(2)
                .all(|pair| pair[0] >= pair[1]));
        }
    }

    #[test]
    fn test_diagonal_singular_values() {
        let a = ComplexMatrix::from_fn(3, 2, |r, c| match (r, c) {
            (0, 0) => C64::new(0.0, 2.0),
            (1, 1) => C64::new(-5.0, 0.0),
            _ => C64::new(0.0, 0.0),
        });
        let svd = Svd::decompose(&a, &SvdConfig::default()).unwrap();
        assert!((svd.singular_values[0] - 5.0).abs() < 1e-14);
        assert!((svd.singular_values[1] - 2.0).abs() < 1e-14);
        assert!((svd.condition_number() - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_pseudo_inverse_is_left_inverse() {
        let a = sample_matrix(5, 2);
        let svd = Svd::decompose(&a, &SvdConfig::default()).unwrap();
        let pinv = svd.pseudo_inverse(1e-10);
        assert_eq!((pinv.rows(), pinv.cols()), (2, 5));
        assert!(pinv.mul(&a).max_abs_diff(&ComplexMatrix::identity(2)) < 1e-11);

        // Least-squares solve recovers exact coefficients
        let coefficients = [C64::new(1.0, -0.5), C64::new(0.25, 2.0)];
        let observed = a.mul_vec(&coefficients);
        let solved = pinv.mul_vec(&observed);
        for (x, y) in solved.iter().zip(&coefficients) {
            assert!((x - y).norm() < 1e-11);
        }
    }

    #[test]
    fn test_rank_deficient_matrix() {
        // Two identical columns
        let a = ComplexMatrix::from_fn(4, 2, |r, _| C64::new(r as f64 + 1.0, 0.5));
        let svd = Svd::decompose(&a, &SvdConfig::default()).unwrap();
        assert_eq!(svd.rank(1e-10), 1);
        assert!(svd.condition_number() > 1e10);

        let pinv = svd.pseudo_inverse(1e-10);
        assert!(pinv.mul(&a).mul(&pinv).max_abs_diff(&pinv) < 1e-12);
    }

    #[test]
    fn test_rejects_bad_shapes_and_values() {
        let config = SvdConfig::default();
        assert_eq!(
            Svd::decompose(&ComplexMatrix::zeros(0, 0), &config).unwrap_err(),
            SvdError::Empty
        );
        assert_eq!(
            Svd::decompose(&ComplexMatrix::zeros(1, 2), &config).unwrap_err(),
            SvdError::WideMatrix { rows: 1, cols: 2 }
        );
        let nan = ComplexMatrix::from_fn(2, 2, |_, _| C64::new(f64::NAN, 0.0));
        assert_eq!(Svd::decompose(&nan, &config).unwrap_err(), SvdError::NonFinite);
    }

    #[test]
    fn test_zero_matrix() {
        let svd = Svd::decompose(&ComplexMatrix::zeros(3, 2), &SvdConfig::default()).unwrap();
        assert_eq!(svd.singular_values, vec![0.0, 0.0]);
        assert!(svd.condition_number().is_infinite());
        assert_eq!(svd.rank(1e-10), 0);
    }
}
