//! Elementwise tolerance comparison of two tensors (allclose).

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::alloc::Allocator;
use crate::dtype::Element;
use crate::shape::{self, Dims, DimsDisplay};
use crate::Tensor;

/// Relative and absolute bounds: `|x - y| <= rtol * |y| + atol`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub rtol: f64,
    pub atol: f64,
}

impl Tolerance {
    pub fn new(rtol: f64, atol: f64) -> Self {
        Self { rtol, atol }
    }

    pub fn accepts(&self, x: f64, y: f64) -> bool {
        (x - y).abs() <= self.rtol * y.abs() + self.atol
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self { rtol: 1e-5, atol: 1e-5 }
    }
}

/// One element outside tolerance.
#[derive(Clone, Debug, PartialEq)]
pub struct Mismatch {
    pub index: Dims,
    pub lhs: f64,
    pub rhs: f64,
}

/// Verdict of [`compare`].
#[derive(Clone, Debug, PartialEq)]
pub enum Closeness {
    Close,
    ShapeMismatch { lhs: Vec<i64>, rhs: Vec<i64> },
    /// Every offending multi-index, first axis varying slowest.
    NotClose(Vec<Mismatch>),
}

impl Closeness {
    pub fn is_close(&self) -> bool {
        matches!(self, Closeness::Close)
    }
}

/// Compare `lhs` against `rhs` elementwise, `rhs` being the reference.
///
/// Both tensors must be dense and of element type `T`.
pub fn compare<T, A, B>(lhs: &Tensor<A>, rhs: &Tensor<B>, tol: Tolerance) -> Closeness
where
    T: Element,
    A: Allocator,
    B: Allocator,
{
    if lhs.shape() != rhs.shape() {
        return Closeness::ShapeMismatch {
            lhs: lhs.shape().to_vec(),
            rhs: rhs.shape().to_vec(),
        };
    }

    let close = lhs
        .as_slice::<T>()
        .iter()
        .zip(rhs.as_slice::<T>())
        .all(|(x, y)| tol.accepts(x.to_f64(), y.to_f64()));
    if close {
        return Closeness::Close;
    }

    // Slow path, only on failure: locate every offending element.
    let mut mismatches = Vec::new();
    for index in shape::compute_index_set(lhs.shape()) {
        let x = lhs.read_at::<T>(shape::compute_elem_offset(lhs.strides(), &index)).to_f64();
        let y = rhs.read_at::<T>(shape::compute_elem_offset(rhs.strides(), &index)).to_f64();
        if !tol.accepts(x, y) {
            mismatches.push(Mismatch { index, lhs: x, rhs: y });
        }
    }
    Closeness::NotClose(mismatches)
}

/// Whether every element of `lhs` is within tolerance of `rhs`.
///
/// Mismatches are reported as `warn` events.
pub fn are_close<T, A, B>(lhs: &Tensor<A>, rhs: &Tensor<B>, rtol: f64, atol: f64) -> bool
where
    T: Element,
    A: Allocator,
    B: Allocator,
{
    match compare::<T, A, B>(lhs, rhs, Tolerance::new(rtol, atol)) {
        Closeness::Close => true,
        Closeness::ShapeMismatch { lhs, rhs } => {
            warn!(lhs = %DimsDisplay(&lhs), rhs = %DimsDisplay(&rhs), "tensor shapes differ");
            false
        }
        Closeness::NotClose(mismatches) => {
            for m in &mismatches {
                warn!(
                    index = %DimsDisplay(&m.index),
                    lhs = m.lhs,
                    rhs = m.rhs,
                    rtol,
                    atol,
                    "element not close"
                );
            }
            warn!(count = mismatches.len(), "tensors are not close");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn floats(values: &[f32]) -> Tensor {
        Tensor::from_data(values, &[values.len() as i64]).unwrap()
    }

    #[test]
    fn test_close_within_tolerance() {
        let a = floats(&[1.0, 2.0]);
        let b = floats(&[1.005, 2.02]);
        assert!(are_close::<f32, _, _>(&a, &b, 0.01, 0.01));
    }

    #[test]
    fn test_reports_offending_index() {
        let a = floats(&[1.0, 2.0]);
        let b = floats(&[1.0, 2.5]);
        assert!(!are_close::<f32, _, _>(&a, &b, 0.01, 0.01));
        match compare::<f32, _, _>(&a, &b, Tolerance::new(0.01, 0.01)) {
            Closeness::NotClose(m) => {
                assert_eq!(m.len(), 1);
                assert_eq!(m[0].index.as_slice(), &[1]);
                assert_eq!(m[0].lhs, 2.0);
                assert_eq!(m[0].rhs, 2.5);
            }
            other => panic!("expected NotClose, got {other:?}"),
        }
    }

    #[test]
    fn test_shape_mismatch() {
        let a = Tensor::from_data(&[1i32, 2, 3, 4], &[2, 2]).unwrap();
        let b = Tensor::from_data(&[1i32, 2, 3, 4], &[4]).unwrap();
        assert_eq!(
            compare::<i32, _, _>(&a, &b, Tolerance::default()),
            Closeness::ShapeMismatch { lhs: vec![2, 2], rhs: vec![4] }
        );
        assert!(!are_close::<i32, _, _>(&a, &b, 0.0, 0.0));
    }

    #[test]
    fn test_multi_index_reporting() {
        let a = Tensor::from_data(&[0.0f64, 1.0, 2.0, 3.0, 4.0, 5.0], &[2, 3]).unwrap();
        let b = Tensor::from_data(&[0.0f64, 9.0, 2.0, 3.0, 4.0, 7.0], &[2, 3]).unwrap();
        let Closeness::NotClose(m) = compare::<f64, _, _>(&a, &b, Tolerance::default()) else {
            panic!("expected NotClose");
        };
        let indices: Vec<Vec<i64>> = m.iter().map(|m| m.index.to_vec()).collect();
        assert_eq!(indices, vec![vec![0, 1], vec![1, 2]]);
    }

    #[test]
    fn test_relative_bound_uses_reference() {
        // |100 - 111| = 11 <= 0.1 * 111, but not <= 0.1 * 100 the other way.
        let tol = Tolerance::new(0.1, 0.0);
        assert!(tol.accepts(100.0, 111.0));
        assert!(!tol.accepts(111.0, 100.0));
    }

    #[test]
    fn test_nan_is_never_close() {
        let a = floats(&[f32::NAN]);
        assert!(!are_close::<f32, _, _>(&a, &a, 1.0, 1.0));
    }

    #[test]
    fn test_empty_tensors_are_close() {
        let a = Tensor::with_shape::<f32>(&[0]).unwrap();
        let b = Tensor::with_shape::<f32>(&[0]).unwrap();
        assert!(compare::<f32, _, _>(&a, &b, Tolerance::default()).is_close());
    }
}
