//! Detection-to-3D Assembler.
//!
//! Turns one set of 2D detections into world-space boxes:
//!
//! | Step | Component | Failure |
//! |------|-----------|---------|
//! | Look up the pose for the capture stamp | [`PoseBuffer`] | `MissingPose` |
//! | Prepare world matrix and inverse projection | [`CameraModel`] | `DegenerateProjection` |
//! | Pick each object's label | [`select_label`] | never |
//! | Project and cast each of the four corners | [`CameraModel::ray_through`], [`raycast::cast`] | `NoIntersection` |
//!
//! A corner that misses every mesh stops the whole set, so either every
//! object of a set is resolved or nothing is produced.

use nalgebra::{Point2, Point3};
use tracing::debug;

use crate::error::PerceptionError;
use crate::mesh::Scene;
use crate::pose::{PoseBuffer, Stamp};
use crate::projector::{CameraModel, ImageSize};
use crate::raycast;

// ────────────────────────────────────────────────────────────────────────────
// Input
// ────────────────────────────────────────────────────────────────────────────

/// Pixel-space box edges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox2D {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl BoundingBox2D {
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// `(left, top)`, `(left, bottom)`, `(right, bottom)`, `(right, top)`.
    pub fn corners(&self) -> [Point2<f64>; 4] {
        [
            Point2::new(self.left, self.top),
            Point2::new(self.left, self.bottom),
            Point2::new(self.right, self.bottom),
            Point2::new(self.right, self.top),
        ]
    }
}

/// One detector output for a camera frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection2D {
    stamp: Stamp,
    frame_id: String,
    labels: Vec<String>,
    boxes: Vec<BoundingBox2D>,
    /// One row per box, one column per label.
    confidences: Vec<Vec<f64>>,
}

impl Detection2D {
    /// # Errors
    ///
    /// [`PerceptionError::ShapeMismatch`] unless there is exactly one
    /// confidence row per box and one score per label in every row.  A set
    /// with boxes must also name at least one label.
    pub fn new(
        stamp: Stamp,
        frame_id: impl Into<String>,
        labels: Vec<String>,
        boxes: Vec<BoundingBox2D>,
        confidences: Vec<Vec<f64>>,
    ) -> Result<Self, PerceptionError> {
        if confidences.len() != boxes.len() {
            return Err(PerceptionError::ShapeMismatch(format!(
                "{} boxes but {} confidence rows",
                boxes.len(),
                confidences.len()
            )));
        }
        if !boxes.is_empty() && labels.is_empty() {
            return Err(PerceptionError::ShapeMismatch(
                "detections without any class label".to_string(),
            ));
        }
        if let Some((row, scores)) = confidences
            .iter()
            .enumerate()
            .find(|(_, scores)| scores.len() != labels.len())
        {
            return Err(PerceptionError::ShapeMismatch(format!(
                "confidence row {row} has {} scores for {} labels",
                scores.len(),
                labels.len()
            )));
        }

        Ok(Self {
            stamp,
            frame_id: frame_id.into(),
            labels,
            boxes,
            confidences,
        })
    }

    /// Capture time of the source image.
    pub fn stamp(&self) -> Stamp {
        self.stamp
    }

    pub fn frame_id(&self) -> &str {
        &self.frame_id
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn boxes(&self) -> &[BoundingBox2D] {
        &self.boxes
    }

    pub fn confidences(&self) -> &[Vec<f64>] {
        &self.confidences
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Output
// ────────────────────────────────────────────────────────────────────────────

/// A resolved object: its label and the world positions of its pixel
/// corners, in [`BoundingBox2D::corners`] order.
#[derive(Debug, Clone, PartialEq)]
pub struct Object3D {
    pub label: String,
    pub corners: [Point3<f64>; 4],
}

/// World-space boxes for one detection set.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection3D {
    /// Capture stamp of the input set.
    pub stamp: Stamp,
    pub frame_id: String,
    pub objects: Vec<Object3D>,
}

// ────────────────────────────────────────────────────────────────────────────
// Assembly
// ────────────────────────────────────────────────────────────────────────────

/// The label of the highest `(score, label)` pair.
///
/// Pairs are ordered by score and then by label text, so equal scores go to
/// the lexicographically greatest label.  NaN scores order above every
/// number.  Returns `None` when `scores` is empty.
pub fn select_label<'a>(scores: &[f64], labels: &'a [String]) -> Option<&'a str> {
    let mut ranked: Vec<(f64, &str)> = scores
        .iter()
        .copied()
        .zip(labels.iter().map(String::as_str))
        .collect();
    ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(b.1)));
    ranked.last().map(|&(_, label)| label)
}

/// Resolve every object of `detections` against `scene`.
///
/// Returns `Ok(None)` for a set with no objects; the pose buffer is not
/// consulted in that case.
///
/// # Errors
///
/// - [`PerceptionError::MissingPose`]: no pose has the set's capture stamp.
/// - [`PerceptionError::DegenerateProjection`]: the pose's projection matrix
///   is singular.
/// - [`PerceptionError::NoIntersection`]: some corner ray hits nothing; the
///   objects resolved before it are discarded.
pub fn assemble(
    detections: &Detection2D,
    poses: &mut PoseBuffer,
    scene: &Scene,
    image: ImageSize,
) -> Result<Option<Detection3D>, PerceptionError> {
    if detections.is_empty() {
        return Ok(None);
    }

    let pose = poses
        .resolve(detections.stamp)
        .ok_or(PerceptionError::MissingPose(detections.stamp))?;
    let camera = CameraModel::from_pose(&pose)?;
    let origin = camera.origin();

    let mut objects = Vec::with_capacity(detections.len());
    for (object, (bbox, scores)) in detections
        .boxes
        .iter()
        .zip(&detections.confidences)
        .enumerate()
    {
        let label = select_label(scores, &detections.labels)
            .unwrap_or_default()
            .to_string();

        let mut corners = [origin; 4];
        for (corner, pixel) in bbox.corners().into_iter().enumerate() {
            let ray = camera.ray_through(pixel, image);
            corners[corner] = raycast::cast(&ray.origin, &ray.direction, scene)
                .ok_or(PerceptionError::NoIntersection { object, corner })?;
        }

        debug!(object, label = %label, "object resolved");
        objects.push(Object3D { label, corners });
    }

    Ok(Some(Detection3D {
        stamp: detections.stamp,
        frame_id: detections.frame_id.clone(),
        objects,
    }))
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
