//! Errors raised by the projection pipeline.

use thiserror::Error;

use crate::pose::Stamp;

/// Every failure the core can report.  None of them is fatal to the process:
/// each one means "skip this input event" or "skip the rest of it".
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PerceptionError {
    #[error("no pose sample matches capture stamp {0}")]
    MissingPose(Stamp),

    #[error("projection matrix is not invertible")]
    DegenerateProjection,

    #[error("corner {corner} of object {object} does not hit any mesh")]
    NoIntersection { object: usize, corner: usize },

    #[error(
        "mesh {mesh_id}: triangle {triangle} references vertex {index} \
         but the fragment has {vertex_count} vertices"
    )]
    InvalidGeometry {
        mesh_id: String,
        triangle: usize,
        index: u32,
        vertex_count: usize,
    },

    #[error("malformed detection set: {0}")]
    ShapeMismatch(String),
}
