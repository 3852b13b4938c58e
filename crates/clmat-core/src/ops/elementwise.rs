//! Element-wise ops: add, sub, scalar add and scale.

use clmat_kernels::{ArgFlags, KernelArg, NdRange};

use crate::broadcast::fit;
use crate::context::{kernel_int, MatContext};
use crate::tensor::Tensor;
use crate::Result;

const IN: ArgFlags = ArgFlags::from_bits(ArgFlags::COPY_IN.bits() | ArgFlags::READ_ONLY.bits());
const OUT: ArgFlags = ArgFlags::from_bits(ArgFlags::WRITE_ONLY.bits() | ArgFlags::COPY_OUT.bits());

impl MatContext<'_> {
    /// `a + b` after fitting both to their common shape.
    pub fn add(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        self.binary("matadd", a, b)
    }

    /// `a - b` after fitting both to their common shape.
    pub fn sub(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        self.binary("matsub", a, b)
    }

    /// `t + s` for every element.
    pub fn add_scalar(&self, t: &Tensor, s: f64) -> Result<Tensor> {
        self.with_scalar("matadds", t, s)
    }

    /// `t * s` for every element.
    pub fn scale(&self, t: &Tensor, s: f64) -> Result<Tensor> {
        self.with_scalar("matmuls", t, s)
    }

    fn binary(&self, kernel: &str, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        let (a, b) = fit(a, b)?;
        let n = a.literal_size();
        let mut out = vec![0.0f64; n];
        self.run(
            kernel,
            &NdRange::d1(n),
            &mut [
                KernelArg::input(a.data(), IN),
                KernelArg::input(b.data(), IN),
                KernelArg::output(&mut out, OUT),
                KernelArg::scalar(kernel_int(n)?),
            ],
        )?;
        Tensor::from_data(a.shape().clone(), out)
    }

    fn with_scalar(&self, kernel: &str, t: &Tensor, s: f64) -> Result<Tensor> {
        let n = t.literal_size();
        let mut out = vec![0.0f64; n];
        self.run(
            kernel,
            &NdRange::d1(n),
            &mut [
                KernelArg::input(t.data(), IN),
                KernelArg::scalar(s),
                KernelArg::output(&mut out, OUT),
                KernelArg::scalar(kernel_int(n)?),
            ],
        )?;
        Tensor::from_data(t.shape().clone(), out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clmat_kernels::AccessMode;

    #[test]
    fn test_transfer_flags() {
        assert_eq!(IN.access().unwrap(), AccessMode::ReadOnly);
        assert!(IN.contains(ArgFlags::COPY_IN));
        assert_eq!(OUT.access().unwrap(), AccessMode::WriteOnly);
        assert!(OUT.contains(ArgFlags::COPY_OUT));
    }
}
