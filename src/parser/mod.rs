// Controls parser module

pub mod controls;
pub mod lexer;

// Public API re-exports
pub use controls::{parse_controls, Controls};
