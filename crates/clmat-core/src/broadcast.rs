//! Shape fitting for element-wise and batched operations.
//!
//! Shapes are compared position by position from axis 0. A position that one
//! shape lacks counts as size 1. Two sizes fit when they are equal or one of
//! them is 1, and the fitted size is the larger one. Operands are then
//! materialised densely at the fitted shape.

use crate::error::MatError;
use crate::shape::Shape;
use crate::tensor::Tensor;
use crate::Result;

/// The common shape of `a` and `b`, or `UnfitShapes`.
///
/// Fails with `SizeOverflow` when the fitted element count does not fit in `usize`.
pub fn fit_shapes(a: &Shape, b: &Shape) -> Result<Shape> {
    let rank = a.ndim().max(b.ndim());
    let mut dims = Vec::with_capacity(rank);
    for axis in 0..rank {
        let (x, y) = (a.effective_dim(axis), b.effective_dim(axis));
        if x != y && x != 1 && y != 1 {
            return Err(MatError::UnfitShapes { left: a.clone(), right: b.clone() });
        }
        dims.push(x.max(y));
    }
    let fitted = Shape::from(dims);
    if fitted.checked_numel().is_none() {
        return Err(MatError::SizeOverflow { shape: fitted });
    }
    Ok(fitted)
}

/// Both operands expanded to their common shape.
pub fn fit(t1: &Tensor, t2: &Tensor) -> Result<(Tensor, Tensor)> {
    let target = fit_shapes(t1.shape(), t2.shape())?;
    Ok((expand_to(t1, &target)?, expand_to(t2, &target)?))
}

/// Replicate `t` along its size-1 (or missing) positions up to `target`.
///
/// `target` must already be a fit of `t.shape()`.
pub fn expand_to(t: &Tensor, target: &Shape) -> Result<Tensor> {
    if t.shape() == target {
        return Ok(t.deep_copy());
    }
    let own = t.shape().padded(target.ndim());
    if own.ndim() != target.ndim() {
        return Err(MatError::UnfitShapes { left: t.shape().clone(), right: target.clone() });
    }
    for (&o, &d) in own.dims().iter().zip(target.dims()) {
        if o != d && o != 1 {
            return Err(MatError::UnfitShapes { left: t.shape().clone(), right: target.clone() });
        }
    }

    let strides = own.strides();
    let src = t.data();
    let mut data = Vec::with_capacity(target.numel());
    for linear in 0..target.numel() {
        let coord = target.index_to_coord(linear)?;
        let offset: usize = coord
            .iter()
            .zip(own.dims())
            .zip(strides.iter())
            .map(|((&c, &d), &s)| (c % d) * s)
            .sum();
        data.push(src[offset]);
    }
    Tensor::from_data(target.clone(), data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_shapes() {
        let s = |d: &[usize]| Shape::new(d);
        assert_eq!(fit_shapes(&s(&[1]), &s(&[2, 3])).unwrap().dims(), &[2, 3]);
        assert_eq!(fit_shapes(&s(&[2, 1, 4]), &s(&[2, 5])).unwrap().dims(), &[2, 5, 4]);
        assert_eq!(fit_shapes(&Shape::scalar(), &s(&[3])).unwrap().dims(), &[3]);
        assert!(matches!(
            fit_shapes(&s(&[3]), &s(&[2, 3])),
            Err(MatError::UnfitShapes { .. })
        ));
    }

    #[test]
    fn test_fit_shapes_overflow() {
        let err = fit_shapes(&Shape::new(&[1 << 33, 1]), &Shape::new(&[1, 1 << 31])).unwrap_err();
        assert!(matches!(err, MatError::SizeOverflow { .. }));
    }

    #[test]
    fn test_fit_replicates_single_value() {
        let one = Tensor::from_data([1], vec![4.0]).unwrap();
        let big = Tensor::from_data([2, 3], (0..6).map(f64::from).collect()).unwrap();
        let (a, b) = fit(&one, &big).unwrap();
        assert_eq!(a.shape().dims(), &[2, 3]);
        assert_eq!(b.shape().dims(), &[2, 3]);
        assert_eq!(a.data(), &[4.0; 6]);
        assert_eq!(b.data(), big.data());
    }

    #[test]
    fn test_fit_replicates_along_axis() {
        // [2, 1]: one column of height 1 repeated over 3 rows.
        let row = Tensor::from_data([2, 1], vec![1.0, 2.0]).unwrap();
        let col = Tensor::from_data([1, 3], vec![10.0, 20.0, 30.0]).unwrap();
        let (a, b) = fit(&row, &col).unwrap();
        assert_eq!(a.data(), &[1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
        assert_eq!(b.data(), &[10.0, 10.0, 20.0, 20.0, 30.0, 30.0]);
    }

    #[test]
    fn test_fit_scalar_operand() {
        let s = Tensor::scalar(2.0);
        let t = Tensor::from_data([2], vec![1.0, 3.0]).unwrap();
        let (a, b) = fit(&s, &t).unwrap();
        assert_eq!(a.data(), &[2.0, 2.0]);
        assert_eq!(b.data(), t.data());
    }

    #[test]
    fn test_expand_rejects_non_fit() {
        let t = Tensor::from_data([2], vec![1.0, 2.0]).unwrap();
        assert!(expand_to(&t, &Shape::new(&[3])).is_err());
        assert!(expand_to(&t, &Shape::scalar()).is_err());
    }
}
