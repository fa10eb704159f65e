//! CLI command implementations.

pub mod align;
pub mod info;
pub mod infer;
