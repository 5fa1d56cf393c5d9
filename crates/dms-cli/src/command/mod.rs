//! Command implementations.

pub mod submit;
pub mod worker;
