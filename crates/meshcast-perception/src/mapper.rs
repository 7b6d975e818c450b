//! The spatial mapper: the scene and the pose buffer as two owned resources,
//! plus one handler per input stream.
//!
//! The mapper performs no I/O and no locking.  Whoever owns it must feed it
//! one event at a time.

use nalgebra::Point3;

use crate::assembler::{self, Detection2D, Detection3D};
use crate::error::PerceptionError;
use crate::mesh::{MeshAggregator, Scene, Triangle, UpsertOutcome};
use crate::pose::{PoseBuffer, PoseRecord};
use crate::projector::ImageSize;

#[derive(Debug, Default)]
pub struct SpatialMapper {
    meshes: MeshAggregator,
    poses: PoseBuffer,
    image: ImageSize,
}

impl SpatialMapper {
    pub fn new(image: ImageSize) -> Self {
        Self {
            meshes: MeshAggregator::new(),
            poses: PoseBuffer::new(),
            image,
        }
    }

    /// Apply a mesh update or removal.  See [`MeshAggregator::upsert`].
    pub fn on_mesh(
        &mut self,
        mesh_id: impl Into<String>,
        vertices: Vec<Point3<f64>>,
        triangles: Vec<Triangle>,
        is_removal: bool,
    ) -> Result<UpsertOutcome, PerceptionError> {
        self.meshes.upsert(mesh_id, vertices, triangles, is_removal)
    }

    pub fn on_pose(&mut self, pose: PoseRecord) {
        self.poses.record(pose);
    }

    /// Project a detection set against the current scene.
    /// See [`assembler::assemble`].
    pub fn on_detections(
        &mut self,
        detections: &Detection2D,
    ) -> Result<Option<Detection3D>, PerceptionError> {
        let scene = self.meshes.snapshot();
        assembler::assemble(detections, &mut self.poses, &scene, self.image)
    }

    pub fn scene(&self) -> Scene {
        self.meshes.snapshot()
    }

    pub fn meshes(&self) -> &MeshAggregator {
        &self.meshes
    }

    pub fn poses(&self) -> &PoseBuffer {
        &self.poses
    }

    pub fn image(&self) -> ImageSize {
        self.image
    }
}
