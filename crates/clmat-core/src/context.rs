//! Binding of the tensor ops to an OpenCL session.

use clmat_kernels::{ArgDescriptor, ElementKind, KernelArg, KernelError, NdRange, Session};

use crate::error::MatError;
use crate::Result;

/// OpenCL C source of the matrix kernels.
pub const MAT_KERNEL_SOURCE: &str = include_str!("kernels/mat.cl");

/// Kernels defined by [`MAT_KERNEL_SOURCE`].
pub const MAT_KERNELS: [&str; 5] = ["matmul", "matadd", "matsub", "matmuls", "matadds"];

/// Tensor algebra on one device session.
///
/// Borrows the session exclusively for its lifetime; the matrix kernels stay
/// registered on the session afterwards.
pub struct MatContext<'s> {
    session: &'s mut Session,
}

impl<'s> MatContext<'s> {
    /// Register the matrix kernels on `session`.
    ///
    /// Only the names the session lacks are registered. A kernel already
    /// registered under one of [`MAT_KERNELS`] is reused when its argument
    /// layout matches ours, otherwise this fails with `InitializationFailed`
    /// wrapping `DuplicateName`.
    pub fn new(session: &'s mut Session) -> Result<Self> {
        if !session.is_open() {
            return Err(MatError::Kernel(KernelError::Uninitialized));
        }
        let registry = session.registry();
        for name in MAT_KERNELS {
            if let Some(kernel) = registry.get(name) {
                if !layout_matches(name, kernel.args()) {
                    return Err(MatError::InitializationFailed(KernelError::DuplicateName(name.to_string())));
                }
            }
        }
        let missing = missing_kernels(|name| registry.contains(name));
        if !missing.is_empty() {
            tracing::debug!(kernels = ?missing, "registering matrix kernels");
            session
                .register(MAT_KERNEL_SOURCE, &missing)
                .map_err(MatError::InitializationFailed)?;
        }
        tracing::debug!(device = session.device_name(), "matrix kernels ready");
        Ok(Self { session })
    }

    pub fn session(&self) -> &Session {
        &*self.session
    }

    pub(crate) fn run(&self, kernel: &str, range: &NdRange, args: &mut [KernelArg<'_>]) -> Result<()> {
        self.session.run(kernel, range, args)?;
        Ok(())
    }
}

/// Names from [`MAT_KERNELS`] for which `has` is false, in declaration order.
fn missing_kernels(has: impl Fn(&str) -> bool) -> Vec<&'static str> {
    MAT_KERNELS.into_iter().filter(|&name| !has(name)).collect()
}

/// Whether `args` is the parameter list `name` is launched with.
fn layout_matches(name: &str, args: &[ArgDescriptor]) -> bool {
    use ElementKind::{Double, Int};
    const BINARY: &[(ElementKind, bool)] = &[(Double, true), (Double, true), (Double, true), (Int, false)];
    const WITH_SCALAR: &[(ElementKind, bool)] = &[(Double, true), (Double, false), (Double, true), (Int, false)];
    const MATMUL: &[(ElementKind, bool)] =
        &[(Double, true), (Double, true), (Double, true), (Int, false), (Int, false), (Int, false)];

    let expected = match name {
        "matmul" => MATMUL,
        "matadd" | "matsub" => BINARY,
        _ => WITH_SCALAR,
    };
    args.len() == expected.len()
        && args
            .iter()
            .zip(expected)
            .all(|(a, &(kind, ptr))| a.kind == kind && a.is_pointer == ptr && !a.is_local())
}

/// Element count as the `int` the kernels take.
pub(crate) fn kernel_int(n: usize) -> Result<i32> {
    i32::try_from(n).map_err(|_| MatError::IndexOutOfRange { index: n, bound: i32::MAX as usize })
}
