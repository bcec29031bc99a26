use smallvec::SmallVec;
use std::fmt;

/// Dimension list with inline storage up to the deepest printable rank.
pub type Dims = SmallVec<[i64; 6]>;

/// Row-major strides (in elements) for a dense tensor of `shape`.
pub fn compute_strides(shape: &[i64]) -> Dims {
    let rank = shape.len();
    if rank == 0 {
        return SmallVec::new();
    }
    let mut strides: Dims = SmallVec::from_elem(0, rank);
    strides[rank - 1] = 1;
    for i in (0..rank - 1).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// Linear element offset of `indices` under `strides`.
pub fn compute_elem_offset(strides: &[i64], indices: &[i64]) -> i64 {
    assert_eq!(
        strides.len(),
        indices.len(),
        "index of rank {} used on a tensor of rank {}",
        indices.len(),
        strides.len()
    );
    strides.iter().zip(indices).map(|(s, i)| s * i).sum()
}

/// Every valid multi-index of `shape`, first axis varying slowest.
pub fn compute_index_set(shape: &[i64]) -> Vec<Dims> {
    let mut set = vec![Dims::new()];
    for &extent in shape {
        let mut next = Vec::with_capacity(set.len() * extent.max(0) as usize);
        for prefix in &set {
            for i in 0..extent {
                let mut index = prefix.clone();
                index.push(i);
                next.push(index);
            }
        }
        set = next;
    }
    set
}

/// Whether `strides` describe a gapless row-major layout of `shape`.
pub fn is_dense(shape: &[i64], strides: &[i64]) -> bool {
    shape.len() == strides.len() && compute_strides(shape).as_slice() == strides
}

/// Product of the extents; 1 for a scalar.
pub fn shape_product(shape: &[i64]) -> i64 {
    shape.iter().product()
}

/// Renders a dimension list as `[2, 3, 4]`.
pub struct DimsDisplay<'a>(pub &'a [i64]);

impl fmt::Display for DimsDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}
