use clmat_kernels::KernelError;

use crate::shape::Shape;

/// Errors raised by tensor construction, indexing and the algebra ops.
#[derive(Debug, thiserror::Error)]
pub enum MatError {
    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error("failed to register the matrix kernels: {0}")]
    InitializationFailed(#[source] KernelError),

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("shapes {left} and {right} cannot be fitted")]
    UnfitShapes { left: Shape, right: Shape },

    #[error("shape {shape} has a zero dimension")]
    DimensionZero { shape: Shape },

    #[error("shape {shape} has more elements than fit in usize")]
    SizeOverflow { shape: Shape },

    #[error("invalid sampling range [{lo}, {hi}]")]
    InvalidRange { lo: f64, hi: f64 },

    #[error("index {index} out of range (bound {bound})")]
    IndexOutOfRange { index: usize, bound: usize },
}

impl MatError {
    /// The nested OpenCL status, if this error came from the runtime.
    pub fn backend_code(&self) -> Option<i32> {
        match self {
            MatError::Kernel(e) | MatError::InitializationFailed(e) => e.backend_code(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let e = MatError::UnfitShapes { left: Shape::new(&[2, 3]), right: Shape::new(&[4]) };
        assert_eq!(e.to_string(), "shapes [2, 3] and [4] cannot be fitted");

        let e = MatError::DimensionZero { shape: Shape::new(&[3, 0]) };
        assert_eq!(e.to_string(), "shape [3, 0] has a zero dimension");

        let e = MatError::InvalidRange { lo: f64::NAN, hi: 1.0 };
        assert_eq!(e.to_string(), "invalid sampling range [NaN, 1]");
    }

    #[test]
    fn test_backend_code_passthrough() {
        let e: MatError = KernelError::BackendError { code: -5, call: "clEnqueueReadBuffer" }.into();
        assert_eq!(e.backend_code(), Some(-5));
        assert_eq!(MatError::IndexOutOfRange { index: 4, bound: 4 }.backend_code(), None);
    }
}
