//! Ray-Mesh Intersector.
//!
//! Casts a [`Ray`] against every fragment of a [`Scene`] and resolves the
//! hit nearest to the ray origin.  A ray through a detection corner usually
//! crosses several surfaces (a table top and the floor under it, or the
//! front and back of a wall); the nearest one is the surface the camera
//! actually saw.
//!
//! Each fragment's [`Bvh`][crate::bvh::Bvh] limits the triangles tested, but
//! the result is the same as testing every triangle.

use nalgebra::{Point3, Vector3};

use crate::mesh::{MeshFragment, Scene};

/// Determinants smaller than this mean the ray is parallel to the triangle.
const EPSILON: f64 = 1e-12;

/// A half-line `origin + t * direction`, `t ≥ 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Point3<f64>,
    /// Not necessarily unit length.
    pub direction: Vector3<f64>,
}

impl Ray {
    pub fn new(origin: Point3<f64>, direction: Vector3<f64>) -> Self {
        Self { origin, direction }
    }

    /// Point at parameter `t` along the ray.
    pub fn point_at(&self, t: f64) -> Point3<f64> {
        self.origin + self.direction * t
    }
}

/// One ray-triangle intersection.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit<'a> {
    pub mesh_id: &'a str,
    pub triangle: usize,
    pub point: Point3<f64>,
    /// Euclidean distance from the ray origin.
    pub distance: f64,
}

/// Möller–Trumbore ray-triangle test.
///
/// Returns the ray parameter `t ≥ 0` of the hit, or `None` when the ray
/// misses, runs parallel to the triangle, or hits behind its origin.
/// Edges and vertices count as hits.
pub fn intersect_triangle(ray: &Ray, [v0, v1, v2]: [Point3<f64>; 3]) -> Option<f64> {
    let edge1 = v1 - v0;
    let edge2 = v2 - v0;

    let h = ray.direction.cross(&edge2);
    let a = edge1.dot(&h);
    if a.abs() < EPSILON {
        return None;
    }

    let f = 1.0 / a;
    let s = ray.origin - v0;
    let u = f * s.dot(&h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(&edge1);
    let v = f * ray.direction.dot(&q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = f * edge2.dot(&q);
    (t >= 0.0).then_some(t)
}

/// Every hit on `fragment`, in ascending triangle order.
fn fragment_hits<'a>(ray: &Ray, fragment: &'a MeshFragment) -> Vec<Hit<'a>> {
    let mut candidates = Vec::new();
    fragment
        .bvh()
        .visit(&ray.origin, &ray.direction, |t| candidates.push(t));
    candidates.sort_unstable();

    candidates
        .into_iter()
        .filter_map(|triangle| {
            let t = intersect_triangle(ray, fragment.triangle_vertices(triangle))?;
            let point = ray.point_at(t);
            Some(Hit {
                mesh_id: fragment.mesh_id(),
                triangle,
                point,
                distance: (point - ray.origin).norm(),
            })
        })
        .collect()
}

/// Every intersection of `ray` with `scene`, ordered by mesh id and then
/// triangle index.
pub fn intersections<'a>(ray: &Ray, scene: &'a Scene) -> Vec<Hit<'a>> {
    if ray.direction == Vector3::zeros() {
        return Vec::new();
    }
    scene.iter().flat_map(|f| fragment_hits(ray, f)).collect()
}

/// The intersection nearest to `origin`, or `None` when the ray touches no
/// geometry.
///
/// Equal distances resolve to the hit listed first by [`intersections`].
pub fn cast(origin: &Point3<f64>, direction: &Vector3<f64>, scene: &Scene) -> Option<Point3<f64>> {
    let ray = Ray::new(*origin, *direction);
    intersections(&ray, scene)
        .into_iter()
        .reduce(|best, hit| if hit.distance < best.distance { hit } else { best })
        .map(|hit| hit.point)
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
