//! Tensor algebra: element-wise, product, transpose.
//!
//! Every op returns a freshly allocated tensor and leaves its inputs untouched.
//! Device ops are methods on [`MatContext`](crate::MatContext); transpose runs
//! on the host.

pub mod elementwise;
pub mod product;
pub mod transpose;

pub use product::{plan_product, ProductPlan};
