//! Core data model of the linear solver layer
//!
//! This module contains the types the solver backends consume and produce:
//! - Variable keys
//! - Linear (Jacobian) factors and the factor graph holding them
//! - Key dimensions, variable ordering and column layout
//! - Per-variable solution vectors

pub mod factor;
pub mod graph;
pub mod key;
pub mod ordering;
pub mod values;

pub use factor::JacobianFactor;
pub use graph::{FactorGraphStatistics, GaussianFactorGraph};
pub use key::Key;
pub use ordering::{ColumnLayout, DimensionMap, Ordering};
pub use values::VectorValues;
