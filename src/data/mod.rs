pub mod loader;
pub mod synthetic;

pub use loader::*;
pub use synthetic::*;
