//! Mesh Aggregator.
//!
//! The headset streams its spatial map as independent surface fragments,
//! each identified by a stable id.  [`MeshAggregator`] keeps the latest
//! fragment per id and hands out [`Scene`] snapshots for ray queries.
//!
//! Fragments are stored behind [`Arc`] so a snapshot is a cheap, immutable
//! copy of the id → fragment mapping: a ray cast running against a snapshot
//! may see a scene that is slightly stale, but never a half-applied update.
//!
//! # Example
//!
//! ```rust
//! use meshcast_perception::mesh::{MeshAggregator, UpsertOutcome};
//! use nalgebra::Point3;
//!
//! let mut meshes = MeshAggregator::new();
//! let floor = vec![
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(0.0, 0.0, 1.0),
//! ];
//!
//! let outcome = meshes.upsert("floor", floor, vec![[0, 1, 2]], false).unwrap();
//! assert_eq!(outcome, UpsertOutcome::Inserted);
//! assert_eq!(meshes.snapshot().len(), 1);
//!
//! meshes.upsert("floor", Vec::new(), Vec::new(), true).unwrap();
//! assert!(meshes.snapshot().is_empty());
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use nalgebra::Point3;
use tracing::{debug, warn};

use crate::bvh::Bvh;
use crate::error::PerceptionError;

/// Three indices into a fragment's vertex list.
pub type Triangle = [u32; 3];

// ────────────────────────────────────────────────────────────────────────────
// MeshFragment
// ────────────────────────────────────────────────────────────────────────────

/// One piece of surface geometry.
#[derive(Debug)]
pub struct MeshFragment {
    mesh_id: String,
    vertices: Vec<Point3<f64>>,
    triangles: Vec<Triangle>,
    bvh: Bvh,
}

impl MeshFragment {
    /// Validate the triangle indices and build the fragment's hierarchy.
    ///
    /// # Errors
    ///
    /// [`PerceptionError::InvalidGeometry`] when any triangle references a
    /// vertex past the end of `vertices`.
    pub fn new(
        mesh_id: impl Into<String>,
        vertices: Vec<Point3<f64>>,
        triangles: Vec<Triangle>,
    ) -> Result<Self, PerceptionError> {
        let mesh_id = mesh_id.into();
        let vertex_count = vertices.len();

        for (triangle, tri) in triangles.iter().enumerate() {
            if let Some(&index) = tri.iter().find(|&&i| i as usize >= vertex_count) {
                return Err(PerceptionError::InvalidGeometry {
                    mesh_id,
                    triangle,
                    index,
                    vertex_count,
                });
            }
        }

        let bvh = Bvh::build(&vertices, &triangles);
        Ok(Self {
            mesh_id,
            vertices,
            triangles,
            bvh,
        })
    }

    pub fn mesh_id(&self) -> &str {
        &self.mesh_id
    }

    pub fn vertices(&self) -> &[Point3<f64>] {
        &self.vertices
    }

    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    /// Corner positions of triangle `index`.
    ///
    /// Panics if `index` is out of range; indices come from this fragment's
    /// own triangle list or hierarchy.
    pub fn triangle_vertices(&self, index: usize) -> [Point3<f64>; 3] {
        self.triangles[index].map(|v| self.vertices[v as usize])
    }

    pub(crate) fn bvh(&self) -> &Bvh {
        &self.bvh
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Scene
// ────────────────────────────────────────────────────────────────────────────

/// A read-only view of every fragment, ordered by ascending mesh id.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    fragments: Vec<Arc<MeshFragment>>,
}

impl Scene {
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Iterate fragments in ascending mesh-id order.
    pub fn iter(&self) -> impl Iterator<Item = &MeshFragment> {
        self.fragments.iter().map(Arc::as_ref)
    }

    pub fn get(&self, mesh_id: &str) -> Option<&MeshFragment> {
        self.fragments
            .binary_search_by(|f| f.mesh_id().cmp(mesh_id))
            .ok()
            .map(|i| self.fragments[i].as_ref())
    }

    /// Total triangle count across all fragments.
    pub fn triangle_count(&self) -> usize {
        self.iter().map(|f| f.triangles().len()).sum()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// MeshAggregator
// ────────────────────────────────────────────────────────────────────────────

/// What an [`MeshAggregator::upsert`] call did to the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new mesh id was added.
    Inserted,
    /// An existing fragment was replaced wholesale.
    Replaced,
    /// A removal dropped an existing fragment.
    Removed,
    /// A removal named an id that is not in the scene.
    Ignored,
}

/// Owns the latest fragment for every mesh id.
#[derive(Debug, Default)]
pub struct MeshAggregator {
    fragments: BTreeMap<String, Arc<MeshFragment>>,
}

impl MeshAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert, replace or remove the fragment for `mesh_id`.
    ///
    /// A replacement discards the previous vertices and triangles entirely;
    /// nothing is merged.  With `is_removal` set the geometry arguments are
    /// ignored.
    ///
    /// # Errors
    ///
    /// [`PerceptionError::InvalidGeometry`] for out-of-range triangle
    /// indices.  The scene is left untouched, including any previous fragment
    /// for the same id.
    pub fn upsert(
        &mut self,
        mesh_id: impl Into<String>,
        vertices: Vec<Point3<f64>>,
        triangles: Vec<Triangle>,
        is_removal: bool,
    ) -> Result<UpsertOutcome, PerceptionError> {
        let mesh_id = mesh_id.into();

        if is_removal {
            let outcome = match self.fragments.remove(&mesh_id) {
                Some(_) => UpsertOutcome::Removed,
                None => UpsertOutcome::Ignored,
            };
            debug!(mesh_id = %mesh_id, ?outcome, "mesh removal");
            return Ok(outcome);
        }

        let fragment = MeshFragment::new(mesh_id.clone(), vertices, triangles).inspect_err(|e| {
            warn!(mesh_id = %mesh_id, error = %e, "rejecting mesh update");
        })?;
        debug!(
            mesh_id = %mesh_id,
            vertices = fragment.vertices().len(),
            triangles = fragment.triangles().len(),
            "mesh update"
        );

        let outcome = match self.fragments.insert(mesh_id, Arc::new(fragment)) {
            Some(_) => UpsertOutcome::Replaced,
            None => UpsertOutcome::Inserted,
        };
        Ok(outcome)
    }

    /// A consistent view of all current fragments.
    pub fn snapshot(&self) -> Scene {
        Scene {
            fragments: self.fragments.values().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn contains(&self, mesh_id: &str) -> bool {
        self.fragments.contains_key(mesh_id)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tri(offset: f64) -> (Vec<Point3<f64>>, Vec<Triangle>) {
        (
            vec![
                Point3::new(offset, 0.0, 0.0),
                Point3::new(offset + 1.0, 0.0, 0.0),
                Point3::new(offset, 1.0, 0.0),
            ],
            vec![[0, 1, 2]],
        )
    }

    #[test]
    fn upsert_new_id_inserts() {
        let mut meshes = MeshAggregator::new();
        let (v, t) = tri(0.0);
        assert_eq!(meshes.upsert("a", v, t, false).unwrap(), UpsertOutcome::Inserted);
        assert!(meshes.contains("a"));
        assert_eq!(meshes.len(), 1);
    }

    #[test]
    fn upsert_same_id_replaces_not_merges() {
        let mut meshes = MeshAggregator::new();
        let (v, t) = tri(0.0);
        meshes.upsert("a", v, t, false).unwrap();

        let vertices = vec![
            Point3::new(5.0, 0.0, 0.0),
            Point3::new(6.0, 0.0, 0.0),
            Point3::new(5.0, 1.0, 0.0),
            Point3::new(6.0, 1.0, 0.0),
        ];
        let outcome = meshes
            .upsert("a", vertices, vec![[0, 1, 2], [1, 3, 2]], false)
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Replaced);

        let scene = meshes.snapshot();
        assert_eq!(scene.len(), 1);
        let fragment = scene.get("a").unwrap();
        assert_eq!(fragment.vertices().len(), 4);
        assert_eq!(fragment.triangles().len(), 2);
        assert_eq!(fragment.vertices()[0], Point3::new(5.0, 0.0, 0.0));
    }

    #[test]
    fn snapshot_counts_distinct_ids() {
        let mut meshes = MeshAggregator::new();
        for i in 0..5 {
            let (v, t) = tri(i as f64 * 2.0);
            meshes.upsert(format!("mesh-{i}"), v, t, false).unwrap();
        }
        let scene = meshes.snapshot();
        assert_eq!(scene.len(), 5);
        assert_eq!(scene.triangle_count(), 5);
    }

    #[test]
    fn snapshot_iterates_in_id_order() {
        let mut meshes = MeshAggregator::new();
        for id in ["c", "a", "b"] {
            let (v, t) = tri(0.0);
            meshes.upsert(id, v, t, false).unwrap();
        }
        let scene = meshes.snapshot();
        let ids: Vec<&str> = scene.iter().map(|f| f.mesh_id()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn removal_of_unknown_id_is_noop() {
        let mut meshes = MeshAggregator::new();
        let (v, t) = tri(0.0);
        meshes.upsert("a", v, t, false).unwrap();

        let outcome = meshes.upsert("ghost", Vec::new(), Vec::new(), true).unwrap();
        assert_eq!(outcome, UpsertOutcome::Ignored);
        assert_eq!(meshes.len(), 1);
    }

    #[test]
    fn removal_drops_existing_fragment() {
        let mut meshes = MeshAggregator::new();
        let (v, t) = tri(0.0);
        meshes.upsert("a", v, t, false).unwrap();

        let outcome = meshes.upsert("a", Vec::new(), Vec::new(), true).unwrap();
        assert_eq!(outcome, UpsertOutcome::Removed);
        assert!(meshes.is_empty());
        assert!(meshes.snapshot().get("a").is_none());
    }

    #[test]
    fn out_of_range_index_is_rejected_and_prior_state_kept() {
        let mut meshes = MeshAggregator::new();
        let (v, t) = tri(0.0);
        meshes.upsert("a", v, t, false).unwrap();

        let (v, _) = tri(10.0);
        let err = meshes.upsert("a", v, vec![[0, 1, 3]], false).unwrap_err();
        assert_eq!(
            err,
            PerceptionError::InvalidGeometry {
                mesh_id: "a".to_string(),
                triangle: 0,
                index: 3,
                vertex_count: 3,
            }
        );

        let scene = meshes.snapshot();
        assert_eq!(scene.get("a").unwrap().vertices()[0], Point3::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn snapshot_is_unaffected_by_later_upserts() {
        let mut meshes = MeshAggregator::new();
        let (v, t) = tri(0.0);
        meshes.upsert("a", v, t, false).unwrap();
        let before = meshes.snapshot();

        let (v, t) = tri(3.0);
        meshes.upsert("a", v, t, false).unwrap();
        meshes.upsert("b", Vec::new(), Vec::new(), false).unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(before.get("a").unwrap().vertices()[0], Point3::new(0.0, 0.0, 0.0));
        assert_eq!(meshes.snapshot().len(), 2);
    }

    #[test]
    fn empty_fragment_is_accepted() {
        let mut meshes = MeshAggregator::new();
        meshes.upsert("empty", Vec::new(), Vec::new(), false).unwrap();
        let scene = meshes.snapshot();
        assert_eq!(scene.triangle_count(), 0);
        assert!(scene.get("empty").unwrap().bvh().is_empty());
    }

    #[test]
    fn triangle_vertices_resolves_indices() {
        let (v, t) = tri(2.0);
        let fragment = MeshFragment::new("x", v, t).unwrap();
        let [a, b, c] = fragment.triangle_vertices(0);
        assert_eq!(a, Point3::new(2.0, 0.0, 0.0));
        assert_eq!(b, Point3::new(3.0, 0.0, 0.0));
        assert_eq!(c, Point3::new(2.0, 1.0, 0.0));
    }
}
