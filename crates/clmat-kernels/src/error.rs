//! Error type for the kernel engine.

use std::fmt;

use crate::ffi::{cl_status_name, ClInt, CL_BUILD_PROGRAM_FAILURE};

/// Errors raised by the session, the kernel registry and the invoker.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("no OpenCL device available: {0}")]
    DeviceUnavailable(String),

    #[error("OpenCL session is not open")]
    Uninitialized,

    #[error("kernel '{0}' is already registered")]
    DuplicateName(String),

    #[error("kernel '{0}' is not registered")]
    UnknownKernel(String),

    #[error("kernel '{kernel}' argument {index} has unsupported type '{type_name}'")]
    UnsupportedArgumentType {
        kernel: String,
        index: usize,
        type_name: String,
    },

    #[error("invalid kernel argument: {0}")]
    InvalidArgument(String),

    #[error("kernel argument {index} requires host data but none was given")]
    NullInput { index: usize },

    #[error("OpenCL program build failed:\n{log}")]
    BuildFailure { log: String },

    #[error("OpenCL error {code} ({}) in {call}", status_name(.code))]
    BackendError { code: ClInt, call: &'static str },
}

fn status_name(code: &ClInt) -> &'static str {
    cl_status_name(*code)
}

/// Coarse classification of a [`KernelError`], one per library-level
/// error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Registry misuse: duplicate or unknown kernel name.
    InvalidName,
    /// A kernel parameter type has no known element size.
    UnknownSize,
    /// Argument marshaling failed before dispatch.
    InvalidArgument,
    /// The session was never opened or is already closed.
    Uninitialized,
    /// The OpenCL runtime reported a failure; see [`KernelError::backend_code`].
    BackendError,
}

impl KernelError {
    /// Library-level category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            KernelError::DuplicateName(_) | KernelError::UnknownKernel(_) => ErrorCategory::InvalidName,
            KernelError::UnsupportedArgumentType { .. } => ErrorCategory::UnknownSize,
            KernelError::InvalidArgument(_) | KernelError::NullInput { .. } => {
                ErrorCategory::InvalidArgument
            }
            KernelError::Uninitialized => ErrorCategory::Uninitialized,
            KernelError::DeviceUnavailable(_)
            | KernelError::BuildFailure { .. }
            | KernelError::BackendError { .. } => ErrorCategory::BackendError,
        }
    }

    /// The underlying OpenCL status, when the category is `BackendError`
    /// and the runtime supplied one.
    pub fn backend_code(&self) -> Option<ClInt> {
        match self {
            KernelError::BackendError { code, .. } => Some(*code),
            KernelError::BuildFailure { .. } => Some(CL_BUILD_PROGRAM_FAILURE),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::InvalidName => "invalid-name",
            ErrorCategory::UnknownSize => "unknown-size",
            ErrorCategory::InvalidArgument => "invalid-argument",
            ErrorCategory::Uninitialized => "uninitialized",
            ErrorCategory::BackendError => "backend-error",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(KernelError::DuplicateName("k".into()).category(), ErrorCategory::InvalidName);
        assert_eq!(KernelError::UnknownKernel("k".into()).category(), ErrorCategory::InvalidName);
        assert_eq!(
            KernelError::UnsupportedArgumentType { kernel: "k".into(), index: 0, type_name: "half".into() }
                .category(),
            ErrorCategory::UnknownSize
        );
        assert_eq!(KernelError::NullInput { index: 2 }.category(), ErrorCategory::InvalidArgument);
        assert_eq!(KernelError::Uninitialized.category(), ErrorCategory::Uninitialized);
    }

    #[test]
    fn test_backend_code_only_for_backend_errors() {
        let e = KernelError::BackendError { code: -5, call: "clEnqueueNDRangeKernel" };
        assert_eq!(e.category(), ErrorCategory::BackendError);
        assert_eq!(e.backend_code(), Some(-5));
        assert_eq!(KernelError::BuildFailure { log: String::new() }.backend_code(), Some(-11));
        assert_eq!(KernelError::InvalidArgument("x".into()).backend_code(), None);
    }

    #[test]
    fn test_display_names_status() {
        let e = KernelError::BackendError { code: -5, call: "clCreateBuffer" };
        assert_eq!(e.to_string(), "OpenCL error -5 (CL_OUT_OF_RESOURCES) in clCreateBuffer");
    }
}
