//! # clmat-core
//!
//! Dense `f64` tensors and their algebra on top of `clmat-kernels`.
//!
//! Provides:
//! - `Tensor` with the first axis varying fastest
//! - Linear index ⇄ coordinate conversion
//! - Shape fitting with replication along size-1 axes
//! - Device add/sub/scale and batched product, host-side transpose

pub mod error;
pub mod shape;
pub mod tensor;
pub mod broadcast;
pub mod context;
pub mod ops;
pub mod prelude;

pub use broadcast::{fit, fit_shapes};
pub use context::{MatContext, MAT_KERNELS, MAT_KERNEL_SOURCE};
pub use error::MatError;
pub use shape::{Coord, Shape};
pub use tensor::Tensor;

pub use clmat_kernels::{Session, SessionConfig};

pub type Result<T> = std::result::Result<T, MatError>;
