//! `meshcast-perception` – Spatial projection core.
//!
//! Turns 2-D object detections into world-space boxes by casting camera rays
//! against the headset's accumulated surface mesh.  Everything in this crate
//! is synchronous and transport-agnostic; the runtime feeds it typed events
//! one at a time.
//!
//! # Modules
//!
//! - [`mesh`] – [`MeshAggregator`][mesh::MeshAggregator]: keeps the latest
//!   [`MeshFragment`][mesh::MeshFragment] per mesh id and hands out immutable
//!   [`Scene`][mesh::Scene] snapshots for ray queries.
//! - [`bvh`] – [`Bvh`][bvh::Bvh]: per-fragment bounding-volume hierarchy
//!   that prunes the triangles a ray has to be tested against.
//! - [`pose`] – [`PoseBuffer`][pose::PoseBuffer]: buffers headset poses and
//!   correlates them with detection capture stamps.
//! - [`projector`] – [`CameraModel`][projector::CameraModel]: turns pixel
//!   coordinates into world-space rays.
//! - [`raycast`] – Möller–Trumbore ray casting against a whole scene.
//! - [`assembler`] – [`assemble`][assembler::assemble]: the per-detection-set
//!   pipeline producing a [`Detection3D`][assembler::Detection3D].
//! - [`mapper`] – [`SpatialMapper`][mapper::SpatialMapper]: owns the scene
//!   and the pose buffer and exposes one handler per inbound event kind.

pub mod assembler;
pub mod bvh;
pub mod error;
pub mod mapper;
pub mod mesh;
pub mod pose;
pub mod projector;
pub mod raycast;

pub use assembler::{BoundingBox2D, Detection2D, Detection3D, Object3D};
pub use error::PerceptionError;
pub use mapper::SpatialMapper;
pub use mesh::{MeshAggregator, MeshFragment, Scene, UpsertOutcome};
pub use pose::{PoseBuffer, PoseRecord, Stamp};
pub use projector::{CameraModel, ImageSize};
pub use raycast::Ray;
