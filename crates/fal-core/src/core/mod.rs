//! Internal implementation modules for `fal-core`.

pub mod config;
pub mod project;
pub mod runtime;
pub mod tooling;
