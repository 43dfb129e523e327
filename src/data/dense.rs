//! Dense element blocks.
//!
//! A [`DenseBlock`] is one square coupling block between two elements, stored
//! row-major. Indexing is bounds-checked and reports
//! [`MeshError::IndexOutOfBounds`] instead of panicking.

use nalgebra::DMatrix;

use crate::mesh_error::MeshError;

/// Square `n x n` block, row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct DenseBlock {
    n: usize,
    vals: Vec<f64>,
}

impl DenseBlock {
    pub fn zeros(n: usize) -> Self {
        Self {
            n,
            vals: vec![0.0; n * n],
        }
    }

    /// Block of `n x n` values given row-major.
    pub fn from_row_major(n: usize, vals: Vec<f64>) -> Result<Self, MeshError> {
        if vals.len() != n * n {
            return Err(MeshError::BufferShape {
                expected: n * n,
                got: vals.len(),
            });
        }
        Ok(Self { n, vals })
    }

    pub fn dim(&self) -> usize {
        self.n
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.vals
    }

    #[inline]
    fn index(&self, row: usize, col: usize) -> Result<usize, MeshError> {
        if row >= self.n {
            return Err(MeshError::IndexOutOfBounds { index: row, len: self.n });
        }
        if col >= self.n {
            return Err(MeshError::IndexOutOfBounds { index: col, len: self.n });
        }
        Ok(row * self.n + col)
    }

    pub fn get(&self, row: usize, col: usize) -> Result<f64, MeshError> {
        Ok(self.vals[self.index(row, col)?])
    }

    pub fn add(&mut self, row: usize, col: usize, val: f64) -> Result<(), MeshError> {
        let idx = self.index(row, col)?;
        self.vals[idx] += val;
        Ok(())
    }

    /// `self += alpha * m` for a matrix of matching shape.
    pub fn add_scaled(&mut self, alpha: f64, m: &DMatrix<f64>) -> Result<(), MeshError> {
        if m.nrows() != self.n || m.ncols() != self.n {
            return Err(MeshError::BufferShape {
                expected: self.n * self.n,
                got: m.len(),
            });
        }
        for r in 0..self.n {
            for c in 0..self.n {
                self.vals[r * self.n + c] += alpha * m[(r, c)];
            }
        }
        Ok(())
    }

    pub fn to_matrix(&self) -> DMatrix<f64> {
        DMatrix::from_row_slice(self.n, self.n, &self.vals)
    }

    /// Change of basis `Bᵀ · self · B` for a nodal-to-target basis `B` of
    /// shape `n x m`. The identity basis returns the block unchanged.
    pub fn project(&self, basis: &DMatrix<f64>) -> Result<DenseBlock, MeshError> {
        if basis.nrows() != self.n {
            return Err(MeshError::BufferShape {
                expected: self.n,
                got: basis.nrows(),
            });
        }
        let projected = basis.transpose() * self.to_matrix() * basis;
        let m = projected.nrows();
        let mut vals = Vec::with_capacity(m * m);
        for r in 0..m {
            for c in 0..m {
                vals.push(projected[(r, c)]);
            }
        }
        Ok(DenseBlock { n: m, vals })
    }

    /// `(row, col, value)` triplets in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        let n = self.n;
        self.vals
            .iter()
            .enumerate()
            .map(move |(i, &v)| (i / n, i % n, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn out_of_range_access_is_an_error() {
        let mut b = DenseBlock::zeros(2);
        b.add(1, 1, 3.0).unwrap();
        assert_eq!(b.get(1, 1).unwrap(), 3.0);
        assert!(matches!(
            b.get(2, 0),
            Err(MeshError::IndexOutOfBounds { index: 2, len: 2 })
        ));
        assert!(b.add(0, 5, 1.0).is_err());
    }

    #[test]
    fn identity_projection_is_a_no_op() {
        let b = DenseBlock::from_row_major(2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let p = b.project(&DMatrix::identity(2, 2)).unwrap();
        assert_eq!(p, b);
    }

    #[test]
    fn projection_to_fewer_modes() {
        // sum of all entries through a single constant mode
        let b = DenseBlock::from_row_major(2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let p = b.project(&DMatrix::from_element(2, 1, 1.0)).unwrap();
        assert_eq!(p.dim(), 1);
        assert_relative_eq!(p.get(0, 0).unwrap(), 10.0);
    }
}
