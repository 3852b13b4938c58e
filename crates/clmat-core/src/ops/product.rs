//! Batched matrix product.
//!
//! Axis 0 is the width and axis 1 the height of each matrix; axes from 2 on
//! are batch axes. `left · right` contracts the width of `left` with the
//! height of `right`, so a `[k, m]` left and a `[n, k]` right give `[n, m]`.

use clmat_kernels::{ArgFlags, KernelArg, NdRange};

use crate::broadcast::{expand_to, fit_shapes};
use crate::context::{kernel_int, MatContext};
use crate::error::MatError;
use crate::shape::Shape;
use crate::tensor::Tensor;
use crate::Result;

/// Shapes and launch geometry of one product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductPlan {
    /// Left operand expanded over the batch: `[inner, height, batch..]`.
    pub left: Shape,
    /// Right operand expanded over the batch: `[width, inner, batch..]`.
    pub right: Shape,
    /// Result shape `[width, height, batch..]`.
    pub out: Shape,
    pub width: usize,
    pub inner: usize,
    pub height: usize,
    /// Number of matrices in the batch.
    pub batch: usize,
}

/// Check two non-scalar operand shapes and derive the product geometry.
///
/// A rank-1 left `[n]` is read as a column `[1, n]`, a rank-1 right `[n]`
/// as a row `[n, 1]`. Every expanded operand and the result must hold at
/// most `i32::MAX` elements, since the kernel indexes them with `int`.
pub fn plan_product(a: &Shape, b: &Shape) -> Result<ProductPlan> {
    let left = match a.dims() {
        [n] => Shape::new(&[1, *n]),
        _ => a.clone(),
    };
    let right = match b.dims() {
        [n] => Shape::new(&[*n, 1]),
        _ => b.clone(),
    };
    if left.ndim() < 2 || right.ndim() < 2 {
        return Err(MatError::DimensionMismatch { expected: 2, got: left.ndim().min(right.ndim()) });
    }

    let (inner, height) = (left.dims()[0], left.dims()[1]);
    let (width, right_inner) = (right.dims()[0], right.dims()[1]);
    if inner != right_inner {
        return Err(MatError::DimensionMismatch { expected: inner, got: right_inner });
    }

    let trailing = fit_shapes(&Shape::new(&left.dims()[2..]), &Shape::new(&right.dims()[2..]))
        .map_err(|_| MatError::UnfitShapes { left: a.clone(), right: b.clone() })?;

    let with_batch = |w: usize, h: usize| {
        let mut dims = vec![w, h];
        dims.extend_from_slice(trailing.dims());
        Shape::from(dims)
    };

    let plan = ProductPlan {
        left: with_batch(inner, height),
        right: with_batch(width, inner),
        out: with_batch(width, height),
        width,
        inner,
        height,
        batch: trailing.numel(),
    };
    for shape in [&plan.left, &plan.right, &plan.out] {
        kernel_int(shape.numel())?;
    }
    Ok(plan)
}

impl MatContext<'_> {
    /// Matrix product `a · b`, batched over trailing axes.
    ///
    /// A rank-0 operand scales the other one. A single-element result is
    /// returned as a scalar.
    pub fn product(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        if let (true, Some(s)) = (a.is_scalar(), a.item()) {
            return self.scale(b, s);
        }
        if let (true, Some(s)) = (b.is_scalar(), b.item()) {
            return self.scale(a, s);
        }

        let plan = plan_product(a.shape(), b.shape())?;
        let left = expand_to(&reshape_operand(a, plan.inner, plan.height)?, &plan.left)?;
        let right = expand_to(&reshape_operand(b, plan.width, plan.inner)?, &plan.right)?;

        let mut out = vec![0.0f64; plan.out.numel()];
        self.run(
            "matmul",
            &NdRange::d3(plan.width, plan.height, plan.batch),
            &mut [
                KernelArg::input(left.data(), ArgFlags::COPY_IN | ArgFlags::READ_ONLY),
                KernelArg::input(right.data(), ArgFlags::COPY_IN | ArgFlags::READ_ONLY),
                KernelArg::output(&mut out, ArgFlags::WRITE_ONLY | ArgFlags::COPY_OUT),
                KernelArg::scalar(kernel_int(plan.width)?),
                KernelArg::scalar(kernel_int(plan.inner)?),
                KernelArg::scalar(kernel_int(plan.height)?),
            ],
        )?;
        Ok(Tensor::from_data(plan.out, out)?.normalise_scalar())
    }
}

/// `t` with its first two axes replaced by `[w, h]`, keeping the batch axes.
fn reshape_operand(t: &Tensor, w: usize, h: usize) -> Result<Tensor> {
    let mut dims = vec![w, h];
    dims.extend(t.shape().dims().iter().skip(2));
    t.deep_copy().reshape(dims)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(a: &[usize], b: &[usize]) -> Result<ProductPlan> {
        plan_product(&Shape::new(a), &Shape::new(b))
    }

    #[test]
    fn test_plan_matrix() {
        let p = plan(&[3, 2], &[4, 3]).unwrap();
        assert_eq!(p.out.dims(), &[4, 2]);
        assert_eq!((p.width, p.inner, p.height, p.batch), (4, 3, 2, 1));
    }

    #[test]
    fn test_plan_contraction_mismatch() {
        assert!(matches!(
            plan(&[3, 2], &[4, 2]),
            Err(MatError::DimensionMismatch { expected: 3, got: 2 })
        ));
    }

    #[test]
    fn test_plan_vectors() {
        // column · row is an outer product
        let p = plan(&[3], &[4]).unwrap();
        assert_eq!(p.left.dims(), &[1, 3]);
        assert_eq!(p.right.dims(), &[4, 1]);
        assert_eq!(p.out.dims(), &[4, 3]);

        // matrix · vector needs a left width of 1
        assert!(plan(&[2, 3], &[5]).is_err());
        assert_eq!(plan(&[1, 3], &[5]).unwrap().out.dims(), &[5, 3]);

        // row-vector · matrix
        assert_eq!(plan(&[2], &[4, 1]).unwrap().out.dims(), &[4, 2]);
    }

    #[test]
    fn test_plan_batch_broadcast() {
        let p = plan(&[3, 2, 5], &[4, 3]).unwrap();
        assert_eq!(p.out.dims(), &[4, 2, 5]);
        assert_eq!(p.right.dims(), &[4, 3, 5]);
        assert_eq!(p.batch, 5);

        let p = plan(&[3, 2, 1, 6], &[4, 3, 5]).unwrap();
        assert_eq!(p.out.dims(), &[4, 2, 5, 6]);
        assert_eq!(p.batch, 30);

        assert!(matches!(
            plan(&[3, 2, 5], &[4, 3, 2]),
            Err(MatError::UnfitShapes { .. })
        ));
    }

    #[test]
    fn test_plan_rejects_oversized_batch() {
        // each dimension fits an int, the batched operands do not
        assert!(matches!(
            plan(&[2, 2, 1 << 30], &[2, 2]),
            Err(MatError::IndexOutOfRange { bound, .. }) if bound == i32::MAX as usize
        ));
        assert!(matches!(
            plan(&[1 << 16, 1 << 16], &[2, 1 << 16]),
            Err(MatError::IndexOutOfRange { index, .. }) if index == 1 << 32
        ));
        assert!(plan(&[1 << 15, 1 << 15], &[2, 1 << 15]).is_ok());
    }

    #[test]
    fn test_reshape_operand_keeps_batch() {
        let t = Tensor::new([3, 2, 5]).unwrap();
        assert_eq!(reshape_operand(&t, 3, 2).unwrap().shape().dims(), &[3, 2, 5]);
        let v = Tensor::new([3]).unwrap();
        assert_eq!(reshape_operand(&v, 1, 3).unwrap().shape().dims(), &[1, 3]);
    }
}
