//! Grid storage: toroidal indexing, dense fields and write-once arenas

pub mod arena;
pub mod field;
pub mod indexing;
pub mod loader;

// Re-export main types
pub use arena::{IterationIndexedField, TimeIndexedField};
pub use field::ScalarField2D;
pub use indexing::{dec_index, inc_index, modulo, wrap};
pub use loader::{format_density, load_density, parse_density};
