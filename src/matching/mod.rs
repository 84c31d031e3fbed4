pub mod correspondence;

pub use correspondence::*;
