//! Banded symmetric storage and LDLᵀ factor/solve.
//!
//! The normal matrix `JᵀJ` of the loop-closure solve only couples variables
//! whose loops lie close together in the reduced ordering, so only the upper
//! band is stored: entry `(row, offset)` holds `A[row][row + offset]` for
//! `offset < width`.

use nalgebra::DVector;

use crate::{KinError, Result};

/// Symmetric matrix stored as its upper band.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BandMatrix {
    n: usize,
    width: usize,
    data: Vec<f64>,
}

impl BandMatrix {
    /// Zero matrix of size `n` storing `width` diagonals (main diagonal
    /// included).
    #[must_use]
    pub fn new(n: usize, width: usize) -> Self {
        let width = width.max(1);
        Self {
            n,
            width,
            data: vec![0.0; n * width],
        }
    }

    /// Matrix size.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.n
    }

    /// Number of stored diagonals.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Resize and zero.
    pub fn resize(&mut self, n: usize, width: usize) {
        self.n = n;
        self.width = width.max(1);
        self.data.clear();
        self.data.resize(n * self.width, 0.0);
    }

    /// Zero every entry.
    pub fn clear(&mut self) {
        self.data.fill(0.0);
    }

    fn slot(&self, row: usize, offset: usize) -> Option<usize> {
        (row < self.n && offset < self.width && row + offset < self.n)
            .then_some(row * self.width + offset)
    }

    /// Band entry `A[row][row + offset]`; zero outside the band.
    #[must_use]
    pub fn get(&self, row: usize, offset: usize) -> f64 {
        self.slot(row, offset).map_or(0.0, |i| self.data[i])
    }

    /// Symmetric entry `A[i][j]`.
    #[must_use]
    pub fn entry(&self, i: usize, j: usize) -> f64 {
        if i <= j {
            self.get(i, j - i)
        } else {
            self.get(j, i - j)
        }
    }

    /// Add to band entry `A[row][row + offset]`.
    ///
    /// Returns `false` (and changes nothing) if the entry lies outside the
    /// stored band.
    pub fn add(&mut self, row: usize, offset: usize, value: f64) -> bool {
        match self.slot(row, offset) {
            Some(i) => {
                self.data[i] += value;
                true
            }
            None => false,
        }
    }

    /// Factor in place as `L·D·Lᵀ` and solve `A·x = rhs`, overwriting `rhs`
    /// with `x`.
    ///
    /// On return the band holds `D` on the main diagonal and `L[i][j]` at
    /// `(j, i - j)`.
    ///
    /// # Errors
    ///
    /// Returns [`KinError::DimensionMismatch`] if `rhs` has the wrong length
    /// and [`KinError::SingularMatrix`] on a pivot that is not positive.
    pub fn solve_ldlt(&mut self, rhs: &mut DVector<f64>) -> Result<()> {
        if rhs.len() != self.n {
            return Err(KinError::DimensionMismatch {
                expected: self.n,
                actual: rhs.len(),
            });
        }
        self.factor()?;
        self.substitute(rhs);
        Ok(())
    }

    fn factor(&mut self) -> Result<()> {
        let n = self.n;
        let w = self.width;
        let bw = w - 1;

        for j in 0..n {
            // d_j = A_jj - Σ L_jk² d_k
            let k0 = j.saturating_sub(bw);
            let mut d = self.data[j * w];
            for k in k0..j {
                let l_jk = self.data[k * w + (j - k)];
                d -= l_jk * l_jk * self.data[k * w];
            }
            if d.is_nan() || d <= 0.0 {
                return Err(KinError::SingularMatrix { row: j, pivot: d });
            }
            self.data[j * w] = d;

            // L_ij = (A_ij - Σ L_ik L_jk d_k) / d_j
            for i in (j + 1)..n.min(j + w) {
                let mut sum = self.data[j * w + (i - j)];
                for k in i.saturating_sub(bw)..j {
                    let row = k * w;
                    sum -= self.data[row + (i - k)] * self.data[row + (j - k)] * self.data[row];
                }
                self.data[j * w + (i - j)] = sum / d;
            }
        }
        Ok(())
    }

    fn substitute(&self, x: &mut DVector<f64>) {
        let n = self.n;
        let w = self.width;
        let bw = w - 1;

        // L·y = b
        for i in 0..n {
            for k in i.saturating_sub(bw)..i {
                x[i] -= self.data[k * w + (i - k)] * x[k];
            }
        }

        // D·z = y
        for i in 0..n {
            x[i] /= self.data[i * w];
        }

        // Lᵀ·x = z
        for i in (0..n).rev() {
            for k in (i + 1)..n.min(i + w) {
                x[i] -= self.data[i * w + (k - i)] * x[k];
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    /// Symmetric positive definite band matrix with bandwidth 2.
    fn sample(n: usize) -> (BandMatrix, DMatrix<f64>) {
        let mut band = BandMatrix::new(n, 3);
        let mut dense = DMatrix::zeros(n, n);
        for i in 0..n {
            let diag = 6.0 + i as f64;
            assert!(band.add(i, 0, diag));
            dense[(i, i)] = diag;
            if i + 1 < n {
                assert!(band.add(i, 1, -1.5));
                dense[(i, i + 1)] = -1.5;
                dense[(i + 1, i)] = -1.5;
            }
            if i + 2 < n {
                assert!(band.add(i, 2, 0.5));
                dense[(i, i + 2)] = 0.5;
                dense[(i + 2, i)] = 0.5;
            }
        }
        (band, dense)
    }

    #[test]
    fn test_solve_matches_dense() {
        let (mut band, dense) = sample(7);
        let b = DVector::from_fn(7, |i, _| (i as f64).sin() + 1.0);
        let mut x = b.clone();
        band.solve_ldlt(&mut x).unwrap();
        assert_relative_eq!(&dense * &x, b, epsilon = 1e-12);
    }

    #[test]
    fn test_accessors() {
        let (band, _) = sample(4);
        assert_eq!(band.size(), 4);
        assert_eq!(band.width(), 3);
        assert_eq!(band.get(1, 1), -1.5);
        assert_eq!(band.entry(3, 1), 0.5);
        assert_eq!(band.entry(0, 3), 0.0);
        // Past the last row.
        assert_eq!(band.get(3, 1), 0.0);
    }

    #[test]
    fn test_out_of_band_add_is_rejected() {
        let mut band = BandMatrix::new(3, 2);
        assert!(!band.add(0, 2, 1.0));
        assert!(!band.add(2, 1, 1.0));
        assert!(band.add(1, 1, 1.0));
    }

    #[test]
    fn test_single_variable() {
        let mut band = BandMatrix::new(1, 1);
        let _ = band.add(0, 0, 4.0);
        let mut x = DVector::from_element(1, 2.0);
        band.solve_ldlt(&mut x).unwrap();
        assert_relative_eq!(x[0], 0.5);
    }

    #[test]
    fn test_singular_and_mismatch() {
        let mut band = BandMatrix::new(2, 2);
        let _ = band.add(0, 0, 1.0);
        let mut x = DVector::zeros(2);
        assert_eq!(
            band.solve_ldlt(&mut x),
            Err(KinError::SingularMatrix { row: 1, pivot: 0.0 })
        );

        let mut short = DVector::zeros(1);
        assert!(matches!(
            band.solve_ldlt(&mut short),
            Err(KinError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_resize_and_clear() {
        let (mut band, _) = sample(3);
        band.clear();
        assert_eq!(band.get(0, 0), 0.0);
        band.resize(5, 0);
        assert_eq!(band.size(), 5);
        assert_eq!(band.width(), 1);
    }
}
