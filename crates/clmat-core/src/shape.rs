use smallvec::SmallVec;
use std::fmt;

use crate::error::MatError;
use crate::Result;

/// Per-axis coordinate of a tensor element.
pub type Coord = SmallVec<[usize; 4]>;

/// Tensor shape with stack-allocated storage for ≤4 dimensions.
///
/// Axis 0 is the width and varies fastest in memory, axis 1 is the height.
/// An empty shape is a scalar.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape {
    dims: SmallVec<[usize; 4]>,
}

impl Shape {
    pub fn new(dims: &[usize]) -> Self {
        Self { dims: SmallVec::from_slice(dims) }
    }

    pub fn scalar() -> Self {
        Self { dims: SmallVec::new() }
    }

    /// Number of dimensions (rank).
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements; 1 for a scalar.
    ///
    /// Saturates at `usize::MAX`; shapes that pass [`Shape::validate`] never do.
    pub fn numel(&self) -> usize {
        self.checked_numel().unwrap_or(usize::MAX)
    }

    /// Element count, or `None` if it does not fit in `usize`.
    pub fn checked_numel(&self) -> Option<usize> {
        self.dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn dim(&self, axis: usize) -> Option<usize> {
        self.dims.get(axis).copied()
    }

    /// Size at `axis`, treating missing positions as 1.
    pub fn effective_dim(&self, axis: usize) -> usize {
        self.dims.get(axis).copied().unwrap_or(1)
    }

    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// Fail with `DimensionZero` if any dimension is 0, or `SizeOverflow`
    /// if the element count does not fit in `usize`.
    pub fn validate(&self) -> Result<()> {
        if self.dims.contains(&0) {
            return Err(MatError::DimensionZero { shape: self.clone() });
        }
        if self.checked_numel().is_none() {
            return Err(MatError::SizeOverflow { shape: self.clone() });
        }
        Ok(())
    }

    /// Strides with the first dimension varying fastest:
    /// `stride_0 = 1`, `stride_i = dims[0] * .. * dims[i-1]`.
    pub fn strides(&self) -> SmallVec<[usize; 4]> {
        let mut strides = SmallVec::with_capacity(self.dims.len());
        let mut acc = 1usize;
        for &d in &self.dims {
            strides.push(acc);
            acc = acc.saturating_mul(d);
        }
        strides
    }

    /// Coordinate of the element at linear position `linear`.
    pub fn index_to_coord(&self, linear: usize) -> Result<Coord> {
        let bound = self.numel();
        if linear >= bound {
            return Err(MatError::IndexOutOfRange { index: linear, bound });
        }
        let mut rest = linear;
        let mut coord = Coord::with_capacity(self.dims.len());
        for &d in &self.dims {
            coord.push(rest % d);
            rest /= d;
        }
        Ok(coord)
    }

    /// Linear position of the element at `coord`.
    pub fn coord_to_offset(&self, coord: &[usize]) -> Result<usize> {
        if coord.len() != self.dims.len() {
            return Err(MatError::DimensionMismatch { expected: self.dims.len(), got: coord.len() });
        }
        let mut offset = 0usize;
        let mut stride = 1usize;
        for (&c, &d) in coord.iter().zip(&self.dims) {
            if c >= d {
                return Err(MatError::IndexOutOfRange { index: c, bound: d });
            }
            offset += c * stride;
            stride = stride.saturating_mul(d);
        }
        Ok(offset)
    }

    /// Shape padded with trailing 1s up to `rank`.
    pub fn padded(&self, rank: usize) -> Shape {
        let mut dims = self.dims.clone();
        while dims.len() < rank {
            dims.push(1);
        }
        Shape { dims }
    }

    /// Rotate the dimension order by one: `[s0, .., sn-1]` becomes `[sn-1, s0, .., sn-2]`.
    pub fn rotated(&self) -> Shape {
        let mut dims = self.dims.clone();
        if !dims.is_empty() {
            dims.rotate_right(1);
        }
        Shape { dims }
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape({:?})", self.dims.as_slice())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims)
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape { dims: SmallVec::from_vec(dims) }
    }
}

impl From<Coord> for Shape {
    fn from(dims: Coord) -> Self {
        Shape { dims }
    }
}

macro_rules! impl_shape_from_array {
    ($($n:expr),*) => {
        $(
            impl From<[usize; $n]> for Shape {
                fn from(dims: [usize; $n]) -> Self {
                    Shape::new(&dims)
                }
            }
        )*
    };
}

impl_shape_from_array!(0, 1, 2, 3, 4, 5, 6);
