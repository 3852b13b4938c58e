//! # clmat-kernels
//!
//! OpenCL kernel registry and invocation engine for clmat.
//!
//! Provides:
//! - Runtime-loaded OpenCL 1.2 entry points (no SDK needed at build time)
//! - An explicit device [`Session`] owning context, queue and kernels
//! - Kernel registration with introspected argument signatures
//! - Typed, synchronous kernel invocation with scoped device buffers

pub mod ffi;
pub mod error;
pub mod config;
pub mod memory;
pub mod registry;
pub mod context;
pub mod launch;

pub use config::{ConfigError, DeviceType, SessionConfig};
pub use context::Session;
pub use error::{ErrorCategory, KernelError};
pub use ffi::cl_status_name;
pub use launch::{BufferArg, DeviceElement, KernelArg, NdRange, ScalarValue};
pub use memory::{AccessMode, ArgFlags};
pub use registry::{parse_type_name, AddressSpace, ArgDescriptor, ElementKind, KernelRegistry, RegisteredKernel};

pub type Result<T> = std::result::Result<T, KernelError>;
