//! Convenience re-exports for common clmat-core types.
//!
//! ```rust
//! use clmat_core::prelude::*;
//! ```

pub use crate::MatContext;
pub use crate::MatError;
pub use crate::Result;
pub use crate::Session;
pub use crate::SessionConfig;
pub use crate::Shape;
pub use crate::Tensor;
