//! Form definitions and responses — the qualification inputs.

pub mod model;

pub use model::*;
