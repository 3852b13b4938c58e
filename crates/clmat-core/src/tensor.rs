use std::fmt;

use rand::distributions::{Distribution, Uniform};
use rand::Rng;

use crate::error::MatError;
use crate::shape::{Coord, Shape};
use crate::Result;

/// A dense, contiguous N-dimensional `f64` tensor.
///
/// Axis 0 varies fastest. A rank-0 tensor is a scalar holding one value.
/// `Clone` is a deep copy.
#[derive(Clone, PartialEq)]
pub struct Tensor {
    shape: Shape,
    data: Vec<f64>,
}

impl Tensor {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Zero-filled tensor of the given shape.
    pub fn new(shape: impl Into<Shape>) -> Result<Self> {
        Self::filled(shape, 0.0)
    }

    /// Tensor of the given shape with every element set to `value`.
    pub fn filled(shape: impl Into<Shape>, value: f64) -> Result<Self> {
        let shape = shape.into();
        shape.validate()?;
        let data = vec![value; shape.numel()];
        Ok(Self { shape, data })
    }

    /// Wrap existing data. `data.len()` must equal the shape's element count.
    pub fn from_data(shape: impl Into<Shape>, data: Vec<f64>) -> Result<Self> {
        let shape = shape.into();
        shape.validate()?;
        if data.len() != shape.numel() {
            return Err(MatError::DimensionMismatch { expected: shape.numel(), got: data.len() });
        }
        Ok(Self { shape, data })
    }

    pub fn scalar(value: f64) -> Self {
        Self { shape: Shape::scalar(), data: vec![value] }
    }

    /// Uniform samples in `[lo, hi]` from the thread-local RNG.
    pub fn rand_uniform(shape: impl Into<Shape>, lo: f64, hi: f64) -> Result<Self> {
        Self::rand_uniform_with(shape, lo, hi, &mut rand::thread_rng())
    }

    /// Uniform samples in `[lo, hi]` from `rng`. The bounds may be given in
    /// either order but must both be finite.
    pub fn rand_uniform_with<R: Rng + ?Sized>(
        shape: impl Into<Shape>,
        lo: f64,
        hi: f64,
        rng: &mut R,
    ) -> Result<Self> {
        let shape = shape.into();
        shape.validate()?;
        if !lo.is_finite() || !hi.is_finite() {
            return Err(MatError::InvalidRange { lo, hi });
        }
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        let dist = Uniform::new_inclusive(lo, hi);
        let data = (0..shape.numel()).map(|_| dist.sample(rng)).collect();
        Ok(Self { shape, data })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Number of dimensions; 0 for a scalar.
    pub fn ndims(&self) -> usize {
        self.shape.ndim()
    }

    /// Number of elements.
    pub fn literal_size(&self) -> usize {
        self.data.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_scalar()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    /// The value of a single-element tensor.
    pub fn item(&self) -> Option<f64> {
        match self.data.as_slice() {
            [v] => Some(*v),
            _ => None,
        }
    }

    // =========================================================================
    // Indexing
    // =========================================================================

    pub fn index_to_coord(&self, linear: usize) -> Result<Coord> {
        self.shape.index_to_coord(linear)
    }

    pub fn coord_to_offset(&self, coord: &[usize]) -> Result<usize> {
        self.shape.coord_to_offset(coord)
    }

    pub fn get(&self, coord: &[usize]) -> Result<f64> {
        let offset = self.coord_to_offset(coord)?;
        Ok(self.data[offset])
    }

    pub fn set(&mut self, coord: &[usize], value: f64) -> Result<()> {
        let offset = self.coord_to_offset(coord)?;
        self.data[offset] = value;
        Ok(())
    }

    // =========================================================================
    // Copies
    // =========================================================================

    /// Independent copy of shape and data.
    pub fn deep_copy(&self) -> Self {
        if let [v] = self.data.as_slice() {
            return Self { shape: self.shape.clone(), data: vec![*v] };
        }
        Self { shape: self.shape.clone(), data: self.data.to_vec() }
    }

    /// 1-D copy `[literal_size]` in the same linear order.
    pub fn flatten(&self) -> Self {
        Self { shape: Shape::new(&[self.data.len()]), data: self.data.clone() }
    }

    /// Same data, reinterpreted under another shape of equal element count.
    pub fn reshape(self, shape: impl Into<Shape>) -> Result<Self> {
        Self::from_data(shape, self.data)
    }

    /// Collapse a single-element tensor to rank 0.
    pub(crate) fn normalise_scalar(self) -> Self {
        match self.item() {
            Some(v) if !self.is_scalar() => Self::scalar(v),
            _ => self,
        }
    }

    fn fmt_axis(&self, f: &mut fmt::Formatter<'_>, axis: usize, offset: usize, strides: &[usize]) -> fmt::Result {
        let n = self.shape.dims()[axis];
        write!(f, "[")?;
        for i in 0..n {
            let at = offset + i * strides[axis];
            if axis == 0 {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", self.data[at])?;
            } else {
                if i > 0 {
                    write!(f, ",\n{}", " ".repeat(self.ndims() - axis))?;
                }
                self.fmt_axis(f, axis - 1, at, strides)?;
            }
        }
        write!(f, "]")
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("data", &self.data)
            .finish()
    }
}

/// Nested print, outermost bracket over the last axis, innermost rows along axis 0.
impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_scalar() {
            return write!(f, "{}", self.data[0]);
        }
        let strides = self.shape.strides();
        self.fmt_axis(f, self.ndims() - 1, 0, &strides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_new_is_zeroed() {
        let t = Tensor::new([2, 3]).unwrap();
        assert_eq!(t.literal_size(), 6);
        assert_eq!(t.ndims(), 2);
        assert!(t.data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(matches!(Tensor::new([2, 0, 3]), Err(MatError::DimensionZero { .. })));
        assert!(matches!(Tensor::filled([0], 1.0), Err(MatError::DimensionZero { .. })));
    }

    #[test]
    fn test_oversized_shape_rejected() {
        assert!(matches!(Tensor::new([1 << 33, 1 << 31]), Err(MatError::SizeOverflow { .. })));
        assert!(matches!(
            Tensor::from_data([1 << 33, 1 << 31], vec![0.0]),
            Err(MatError::SizeOverflow { .. })
        ));
        assert!(Tensor::rand_uniform([usize::MAX, 2], 0.0, 1.0).is_err());
    }

    #[test]
    fn test_scalar() {
        let s = Tensor::scalar(20.0);
        assert_eq!(s.literal_size(), 1);
        assert_eq!(s.ndims(), 0);
        assert_eq!(s.item(), Some(20.0));
        assert_eq!(s.get(&[]).unwrap(), 20.0);
        assert_eq!(s.to_string(), "20");
    }

    #[test]
    fn test_from_data_length_checked() {
        assert!(Tensor::from_data([2, 2], vec![1.0; 4]).is_ok());
        assert!(matches!(
            Tensor::from_data([2, 2], vec![1.0; 3]),
            Err(MatError::DimensionMismatch { expected: 4, got: 3 })
        ));
    }

    #[test]
    fn test_get_set() {
        let mut t = Tensor::new([2, 3]).unwrap();
        t.set(&[1, 2], 7.0).unwrap();
        assert_eq!(t.get(&[1, 2]).unwrap(), 7.0);
        assert_eq!(t.data()[5], 7.0);
        assert!(t.set(&[2, 0], 1.0).is_err());
        assert!(t.get(&[0]).is_err());
    }

    #[test]
    fn test_deep_copy_is_independent() {
        let t = Tensor::from_data([3], vec![1.0, 2.0, 3.0]).unwrap();
        let mut c = t.deep_copy();
        c.data_mut()[0] = 9.0;
        assert_eq!(t.data()[0], 1.0);
        assert_eq!(c.shape(), t.shape());

        let s = Tensor::scalar(4.0).deep_copy();
        assert_eq!(s.item(), Some(4.0));
        assert!(s.is_scalar());
    }

    #[test]
    fn test_flatten_and_reshape() {
        let t = Tensor::from_data([2, 3], (0..6).map(f64::from).collect()).unwrap();
        let flat = t.flatten();
        assert_eq!(flat.shape().dims(), &[6]);
        assert_eq!(flat.data(), t.data());
        assert!(flat.clone().reshape([3, 2]).is_ok());
        assert!(flat.reshape([4, 2]).is_err());
    }

    #[test]
    fn test_normalise_scalar() {
        let t = Tensor::from_data([1, 1], vec![5.0]).unwrap().normalise_scalar();
        assert!(t.is_scalar());
        assert_eq!(t.item(), Some(5.0));
        let t = Tensor::new([2]).unwrap().normalise_scalar();
        assert_eq!(t.ndims(), 1);
    }

    #[test]
    fn test_rand_uniform_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let t = Tensor::rand_uniform_with([4, 4], 1.0, -1.0, &mut rng).unwrap();
        assert!(t.data().iter().all(|v| (-1.0..=1.0).contains(v)));
        assert!(Tensor::rand_uniform([3, 0], 0.0, 1.0).is_err());
    }

    #[test]
    fn test_rand_uniform_rejects_non_finite() {
        assert!(matches!(Tensor::rand_uniform([2], f64::NAN, 1.0), Err(MatError::InvalidRange { .. })));
        assert!(matches!(
            Tensor::rand_uniform([2], 0.0, f64::INFINITY),
            Err(MatError::InvalidRange { .. })
        ));
        assert!(Tensor::rand_uniform([2], f64::NEG_INFINITY, f64::INFINITY).is_err());
        let t = Tensor::rand_uniform([2], -0.5, -0.5).unwrap();
        assert_eq!(t.data(), &[-0.5, -0.5]);
    }

    #[test]
    fn test_display_nested() {
        let t = Tensor::from_data([2, 2], vec![1.0, 2.0, 77.0, 2.0]).unwrap();
        assert_eq!(t.to_string(), "[[1, 2],\n [77, 2]]");
        let v = Tensor::from_data([3], vec![1.5, 2.0, 3.0]).unwrap();
        assert_eq!(v.to_string(), "[1.5, 2, 3]");
    }
}
