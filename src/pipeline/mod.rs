//! Registration orchestration.

pub mod registrar;

pub use registrar::*;
