//! Triangle Bounding-Volume Hierarchy.
//!
//! Partitions the triangles of one mesh fragment into a binary tree of
//! axis-aligned boxes so a ray only has to be tested against the triangles
//! whose boxes it actually crosses.  The hierarchy is a pure acceleration
//! structure: visiting every candidate it reports yields exactly the hits a
//! brute-force scan over all triangles would.
//!
//! # Key types
//!
//! | Type | Role |
//! |------|------|
//! | [`Aabb`] | An axis-aligned bounding box.                         |
//! | [`Bvh`]  | Spatial index; build from triangles, query with a ray. |
//!
//! # Example
//!
//! ```rust
//! use meshcast_perception::bvh::Bvh;
//! use nalgebra::{Point3, Vector3};
//!
//! let vertices = vec![
//!     Point3::new(-1.0, -1.0, -5.0),
//!     Point3::new(1.0, -1.0, -5.0),
//!     Point3::new(0.0, 1.0, -5.0),
//! ];
//! let bvh = Bvh::build(&vertices, &[[0, 1, 2]]);
//!
//! let mut hits = Vec::new();
//! bvh.visit(&Point3::origin(), &Vector3::new(0.0, 0.0, -1.0), |t| hits.push(t));
//! assert_eq!(hits, vec![0]);
//! ```

use nalgebra::{Point3, Vector3};

/// Leaves hold at most this many triangles unless the depth budget runs out.
const LEAF_CAPACITY: usize = 4;

/// Maximum number of splits from the root to any leaf.
const MAX_DEPTH: usize = 32;

/// Relative margin added around every node box before a ray test.  It
/// covers the rounding slack between the slab test and the exact
/// ray-triangle test, so a triangle hit is never pruned.
const BOUNDS_MARGIN: f64 = 1e-9;

/// `1 + 2γ₃` (γₙ = nε / (1 − nε)): widens the far slab distance so rounding
/// in `(bound − origin) / direction` cannot reject a grazing ray.
const FAR_SCALE: f64 = 1.0 + 2.0 * (3.0 * f64::EPSILON / (1.0 - 3.0 * f64::EPSILON));

// ────────────────────────────────────────────────────────────────────────────
// Aabb
// ────────────────────────────────────────────────────────────────────────────

/// An axis-aligned bounding box, defined by its minimum and maximum corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl Aabb {
    /// Create a bounding box from its two opposite corners.
    ///
    /// The constructor normalises the corners so that `min ≤ max` per axis.
    pub fn new(a: Point3<f64>, b: Point3<f64>) -> Self {
        Self {
            min: a.inf(&b),
            max: a.sup(&b),
        }
    }

    /// The smallest box containing every point in `points`, or `None` when
    /// the iterator is empty.
    pub fn enclosing(points: impl IntoIterator<Item = Point3<f64>>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        Some(iter.fold(Self::new(first, first), |acc, p| acc.grown(p)))
    }

    /// This box extended to include `p`.
    pub fn grown(&self, p: Point3<f64>) -> Self {
        Self {
            min: self.min.inf(&p),
            max: self.max.sup(&p),
        }
    }

    /// The smallest box containing both `self` and `other`.
    pub fn union(&self, other: &Aabb) -> Self {
        Self {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }

    /// Return the centre point of the box.
    pub fn centre(&self) -> Point3<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    /// Index (0 = x, 1 = y, 2 = z) of the box's longest side.
    pub fn longest_axis(&self) -> usize {
        let extent = self.max - self.min;
        if extent.x >= extent.y && extent.x >= extent.z {
            0
        } else if extent.y >= extent.z {
            1
        } else {
            2
        }
    }

    /// This box grown by `margin` on every side.
    pub fn expanded(&self, margin: f64) -> Self {
        let pad = Vector3::repeat(margin);
        Self {
            min: self.min - pad,
            max: self.max + pad,
        }
    }

    /// This box grown by [`BOUNDS_MARGIN`] relative to its own extent and
    /// its distance from the world origin.
    fn padded(&self) -> Self {
        let reach = self.min.coords.amax().max(self.max.coords.amax());
        let extent = (self.max - self.min).amax();
        self.expanded(BOUNDS_MARGIN * (1.0 + reach + extent))
    }

    /// True when the point lies inside or on the boundary of the box.
    pub fn contains_point(&self, p: Point3<f64>) -> bool {
        (0..3).all(|axis| p[axis] >= self.min[axis] && p[axis] <= self.max[axis])
    }

    /// True when the ray `origin + t * direction`, `t ≥ 0`, touches the box.
    ///
    /// Conservative slab test: boundaries are inclusive so zero-thickness
    /// boxes (a flat floor patch) are still hit, and the far distance is
    /// widened to absorb rounding.  It may report a box the ray only grazes,
    /// never miss one the ray crosses.
    pub fn intersects_ray(&self, origin: &Point3<f64>, direction: &Vector3<f64>) -> bool {
        let mut t_near = 0.0_f64;
        let mut t_far = f64::INFINITY;

        for axis in 0..3 {
            let o = origin[axis];
            let d = direction[axis];
            let (lo, hi) = (self.min[axis], self.max[axis]);

            if d == 0.0 {
                if o < lo || o > hi {
                    return false;
                }
                continue;
            }

            let inv = 1.0 / d;
            let (mut t0, mut t1) = ((lo - o) * inv, (hi - o) * inv);
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_near = t_near.max(t0);
            t_far = t_far.min(t1 * FAR_SCALE);
            if t_near > t_far {
                return false;
            }
        }
        true
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Bvh
// ────────────────────────────────────────────────────────────────────────────

/// A binary hierarchy of triangle bounding boxes over one fragment.
///
/// Built once with [`Bvh::build`]; queried with [`Bvh::visit`], which calls
/// back with the index of every triangle whose box the ray crosses.  Visit
/// order follows the tree, not the triangle list.
#[derive(Debug, Default)]
pub struct Bvh {
    root: Option<BvhNode>,
}

impl Bvh {
    /// Build a hierarchy over `triangles`.
    ///
    /// Every index in `triangles` must be in range for `vertices`; the mesh
    /// aggregator validates that before building.
    pub fn build(vertices: &[Point3<f64>], triangles: &[[u32; 3]]) -> Self {
        let prims: Vec<Primitive> = triangles
            .iter()
            .enumerate()
            .filter_map(|(index, tri)| {
                let bounds = Aabb::enclosing(tri.iter().map(|&v| vertices[v as usize]))?;
                Some(Primitive {
                    index,
                    centroid: bounds.centre(),
                    bounds,
                })
            })
            .collect();

        if prims.is_empty() {
            return Self { root: None };
        }
        Self {
            root: Some(BvhNode::build(prims, 0)),
        }
    }

    /// Bounds of the whole fragment, or `None` for an empty one.
    pub fn bounds(&self) -> Option<Aabb> {
        self.root.as_ref().map(BvhNode::bounds)
    }

    /// Number of triangles indexed by the hierarchy.
    pub fn len(&self) -> usize {
        self.root.as_ref().map_or(0, BvhNode::count)
    }

    /// True when the hierarchy indexes no triangles.
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Call `f` with the index of each triangle whose bounding box the ray
    /// touches.
    pub fn visit<F>(&self, origin: &Point3<f64>, direction: &Vector3<f64>, mut f: F)
    where
        F: FnMut(usize),
    {
        if let Some(root) = &self.root {
            root.visit(origin, direction, &mut f);
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// BvhNode – internal implementation
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Primitive {
    index: usize,
    bounds: Aabb,
    centroid: Point3<f64>,
}

#[derive(Debug)]
enum BvhNode {
    Leaf {
        bounds: Aabb,
        triangles: Vec<usize>,
    },
    Branch {
        bounds: Aabb,
        children: Box<[BvhNode; 2]>,
    },
}

impl BvhNode {
    fn build(mut prims: Vec<Primitive>, depth: usize) -> Self {
        let bounds = prims
            .iter()
            .skip(1)
            .fold(prims[0].bounds, |acc, p| acc.union(&p.bounds));

        if prims.len() <= LEAF_CAPACITY || depth >= MAX_DEPTH {
            return Self::leaf(bounds, &prims);
        }

        // Split at the median centroid along the longest centroid extent.
        let Some(centroids) = Aabb::enclosing(prims.iter().map(|p| p.centroid)) else {
            return Self::leaf(bounds, &prims);
        };
        let axis = centroids.longest_axis();
        if centroids.max[axis] - centroids.min[axis] <= 0.0 {
            // All centroids coincide; splitting cannot separate them.
            return Self::leaf(bounds, &prims);
        }

        let mid = prims.len() / 2;
        prims.select_nth_unstable_by(mid, |a, b| a.centroid[axis].total_cmp(&b.centroid[axis]));
        let right = prims.split_off(mid);

        Self::Branch {
            bounds,
            children: Box::new([Self::build(prims, depth + 1), Self::build(right, depth + 1)]),
        }
    }

    fn leaf(bounds: Aabb, prims: &[Primitive]) -> Self {
        Self::Leaf {
            bounds,
            triangles: prims.iter().map(|p| p.index).collect(),
        }
    }

    fn bounds(&self) -> Aabb {
        match self {
            Self::Leaf { bounds, .. } | Self::Branch { bounds, .. } => *bounds,
        }
    }

    fn count(&self) -> usize {
        match self {
            Self::Leaf { triangles, .. } => triangles.len(),
            Self::Branch { children, .. } => children.iter().map(BvhNode::count).sum(),
        }
    }

    fn visit<F>(&self, origin: &Point3<f64>, direction: &Vector3<f64>, f: &mut F)
    where
        F: FnMut(usize),
    {
        if !self.bounds().padded().intersects_ray(origin, direction) {
            return;
        }
        match self {
            Self::Leaf { triangles, .. } => triangles.iter().for_each(|&t| f(t)),
            Self::Branch { children, .. } => {
                for child in children.iter() {
                    child.visit(origin, direction, f);
                }
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
