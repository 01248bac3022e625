//! Solution demultiplexing.

use crate::core::{ColumnLayout, VectorValues};
use crate::linalg::{LinAlgError, LinAlgResult};
use nalgebra::DVector;

/// Split a flat solution into per-key vectors using `layout`.
///
/// The layout's ranges are checked to tile `[0, n)` exactly before anything is extracted,
/// and the solution must have exactly `n` entries.
pub fn demultiplex(solution: &[f64], layout: &ColumnLayout) -> LinAlgResult<VectorValues> {
    layout.verify_coverage()?;
    if solution.len() != layout.total_dimension() {
        return Err(LinAlgError::LayoutMismatch(format!(
            "solution has {} entries, layout covers {} columns",
            solution.len(),
            layout.total_dimension()
        )));
    }

    Ok(layout
        .iter()
        .map(|(key, offset, dim)| {
            (
                key,
                DVector::from_column_slice(&solution[offset..offset + dim]),
            )
        })
        .collect())
}
