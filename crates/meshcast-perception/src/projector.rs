//! Coordinate Projector.
//!
//! Maps a pixel of the headset's camera image to a world-space [`Ray`]
//! starting at the camera position.
//!
//! The pixel is first normalised to `[-1, 1]` on both axes (image rows grow
//! downward, so y is flipped), pushed back through the inverse projection
//! matrix onto the camera-space plane `z = 1`, and finally carried into the
//! world by the pose's world matrix.
//!
//! The headset reports its world matrix in a left-handed convention while
//! the spatial mesh is right-handed; [`to_right_handed`] negates the
//! matrix's Z axis and must be applied before any projection.
//!
//! # Example
//!
//! ```rust
//! use meshcast_perception::pose::{PoseRecord, Stamp};
//! use meshcast_perception::projector::{CameraModel, ImageSize};
//! use nalgebra::{Matrix4, Point2};
//!
//! let pose = PoseRecord::new(Stamp::new(1, 0), Matrix4::identity(), Matrix4::identity());
//! let camera = CameraModel::from_pose(&pose).unwrap();
//!
//! let image = ImageSize::new(1280.0, 720.0);
//! let ray = camera.ray_through(Point2::new(640.0, 360.0), image);
//! // Straight ahead is -Z once the pose is converted to right-handed space.
//! assert!((ray.direction.z + 1.0).abs() < 1e-12);
//! ```

use nalgebra::{Matrix4, Point2, Point3, Vector2};

use crate::error::PerceptionError;
use crate::pose::PoseRecord;
use crate::raycast::Ray;

/// Resolution of the camera image the detector ran on, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageSize {
    pub width: f64,
    pub height: f64,
}

impl ImageSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

impl Default for ImageSize {
    /// The headset's photo-video camera stream.
    fn default() -> Self {
        Self::new(1280.0, 720.0)
    }
}

/// Scale a pixel coordinate into `[-1, 1]`, with +y pointing up.
pub fn normalize_pixel(pixel: Point2<f64>, image: ImageSize) -> Point2<f64> {
    let unit = Vector2::new(pixel.x / image.width, 1.0 - pixel.y / image.height);
    Point2::from(unit * 2.0 - Vector2::new(1.0, 1.0))
}

/// Negate the Z axis (third column, rotation rows only) of a left-handed
/// world matrix.
pub fn to_right_handed(world: &Matrix4<f64>) -> Matrix4<f64> {
    let mut m = *world;
    for row in 0..3 {
        m[(row, 2)] = -m[(row, 2)];
    }
    m
}

/// Invert a projection matrix.
///
/// # Errors
///
/// [`PerceptionError::DegenerateProjection`] when the matrix is singular or
/// the inverse is not finite.
pub fn invert_projection(projection: &Matrix4<f64>) -> Result<Matrix4<f64>, PerceptionError> {
    projection
        .try_inverse()
        .filter(|inverse| inverse.iter().all(|v| v.is_finite()))
        .ok_or(PerceptionError::DegenerateProjection)
}

/// Apply `m` to `p` with `w = 1`, keeping x, y, z of the result without a
/// perspective divide.
fn apply(m: &Matrix4<f64>, p: &Point3<f64>) -> Point3<f64> {
    let h = m * p.to_homogeneous();
    Point3::new(h.x, h.y, h.z)
}

/// World position of the camera: `world` applied to the camera-space origin.
pub fn camera_origin(world: &Matrix4<f64>) -> Point3<f64> {
    apply(world, &Point3::origin())
}

/// World-space point on the ray through `pixel`.
fn pixel_target(
    pixel: Point2<f64>,
    world: &Matrix4<f64>,
    inverse_projection: &Matrix4<f64>,
    image: ImageSize,
) -> Point3<f64> {
    let ndc = normalize_pixel(pixel, image);
    let camera = apply(inverse_projection, &Point3::new(ndc.x, ndc.y, 1.0));
    // Only the image-plane offsets survive; depth is pinned to 1.
    apply(world, &Point3::new(camera.x, camera.y, 1.0))
}

/// Build the world ray through `pixel`.
///
/// `world` must already be right-handed (see [`to_right_handed`]).  The
/// direction is not normalised.
pub fn project(
    pixel: Point2<f64>,
    world: &Matrix4<f64>,
    inverse_projection: &Matrix4<f64>,
    image: ImageSize,
) -> Ray {
    let origin = camera_origin(world);
    let target = pixel_target(pixel, world, inverse_projection, image);
    Ray::new(origin, target - origin)
}

// ────────────────────────────────────────────────────────────────────────────
// CameraModel
// ────────────────────────────────────────────────────────────────────────────

/// A pose prepared for projecting many pixels: right-handed world matrix,
/// inverted projection, and the camera position computed once.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraModel {
    world: Matrix4<f64>,
    inverse_projection: Matrix4<f64>,
    origin: Point3<f64>,
}

impl CameraModel {
    /// # Errors
    ///
    /// [`PerceptionError::DegenerateProjection`] if the pose's projection
    /// matrix cannot be inverted.
    pub fn from_pose(pose: &PoseRecord) -> Result<Self, PerceptionError> {
        let world = to_right_handed(&pose.world_matrix);
        let inverse_projection = invert_projection(&pose.projection_matrix)?;
        Ok(Self {
            world,
            inverse_projection,
            origin: camera_origin(&world),
        })
    }

    /// Camera position in world space.
    pub fn origin(&self) -> Point3<f64> {
        self.origin
    }

    /// The right-handed world matrix.
    pub fn world(&self) -> &Matrix4<f64> {
        &self.world
    }

    /// Same result as [`project`], reusing the cached camera position.
    pub fn ray_through(&self, pixel: Point2<f64>, image: ImageSize) -> Ray {
        let target = pixel_target(pixel, &self.world, &self.inverse_projection, image);
        Ray::new(self.origin, target - self.origin)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
