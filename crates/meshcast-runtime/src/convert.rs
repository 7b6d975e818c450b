//! Conversions between the serde wire messages of `meshcast-types` and the
//! geometry types of `meshcast-perception`.
//!
//! | Wire message | Core type | Direction |
//! |---|---|---|
//! | [`SpatialMesh`] | vertices + [`Triangle`]s | in |
//! | [`HeadsetPoseData`] | [`PoseRecord`] | in |
//! | [`ObjectDetection2dSet`] | [`Detection2D`] | in |
//! | [`ObjectDetection3dSet`] | [`Detection3D`] | out |

use meshcast_perception::mesh::Triangle;
use meshcast_perception::{
    BoundingBox2D, Detection2D, Detection3D, PerceptionError, PoseRecord, Stamp,
};
use meshcast_types::{
    HeadsetPoseData, Header, ObjectDetection2dSet, ObjectDetection3dSet, Point, SpatialMesh, Time,
};
use nalgebra::Point3;

pub fn stamp_from_time(time: Time) -> Stamp {
    Stamp::new(time.sec, time.nanosec)
}

pub fn time_from_stamp(stamp: Stamp) -> Time {
    Time::new(stamp.sec, stamp.nanosec)
}

/// Vertex positions and triangle index triples of a mesh message.
pub fn mesh_geometry(mesh: &SpatialMesh) -> (Vec<Point3<f64>>, Vec<Triangle>) {
    let vertices = mesh
        .mesh
        .vertices
        .iter()
        .map(|p| Point3::new(p.x, p.y, p.z))
        .collect();
    let triangles = mesh.mesh.triangles.iter().map(|t| t.vertex_indices).collect();
    (vertices, triangles)
}

/// The pose sample, keyed by its header stamp.
pub fn pose_record(pose: &HeadsetPoseData) -> PoseRecord {
    PoseRecord::from_row_major(
        stamp_from_time(pose.header.stamp),
        &pose.world_matrix,
        &pose.projection_matrix,
    )
}

/// Validate a 2D detection message and reshape it for the assembler.
///
/// The set is keyed by `source_stamp`, the capture time of the image the
/// detector ran on.  `label_confidences` is read row-major, one row of
/// `label_vec.len()` scores per object.
///
/// # Errors
///
/// [`PerceptionError::ShapeMismatch`] when an edge array does not hold
/// exactly `num_detections` entries or the confidence matrix has the wrong
/// size.
pub fn detection_2d(set: &ObjectDetection2dSet) -> Result<Detection2D, PerceptionError> {
    let count = set.num_detections as usize;
    for (name, edges) in [
        ("left", &set.left),
        ("top", &set.top),
        ("right", &set.right),
        ("bottom", &set.bottom),
    ] {
        if edges.len() != count {
            return Err(PerceptionError::ShapeMismatch(format!(
                "{name} has {} entries for {count} detections",
                edges.len()
            )));
        }
    }

    let classes = set.label_vec.len();
    if set.label_confidences.len() != count * classes {
        return Err(PerceptionError::ShapeMismatch(format!(
            "{} confidences for {count} detections × {classes} labels",
            set.label_confidences.len()
        )));
    }
    let confidences = if classes == 0 {
        vec![Vec::new(); count]
    } else {
        set.label_confidences
            .chunks_exact(classes)
            .map(<[f64]>::to_vec)
            .collect()
    };

    let boxes = (0..count)
        .map(|i| {
            BoundingBox2D::new(
                f64::from(set.left[i]),
                f64::from(set.top[i]),
                f64::from(set.right[i]),
                f64::from(set.bottom[i]),
            )
        })
        .collect();

    Detection2D::new(
        stamp_from_time(set.source_stamp),
        set.header.frame_id.clone(),
        set.label_vec.clone(),
        boxes,
        confidences,
    )
}

fn point(p: &Point3<f64>) -> Point {
    Point::new(p.x, p.y, p.z)
}

/// Build the outbound message for a resolved set, stamped `now`.
///
/// Corners map to the message's arrays in box order: `(left, top)` →
/// `left`, `(left, bottom)` → `top`, `(right, bottom)` → `right`,
/// `(right, top)` → `bottom`.
pub fn detection_3d_set(result: &Detection3D, now: Time) -> ObjectDetection3dSet {
    let mut set = ObjectDetection3dSet {
        header: Header {
            stamp: now,
            frame_id: result.frame_id.clone(),
        },
        source_stamp: time_from_stamp(result.stamp),
        num_objects: result.objects.len() as u32,
        ..Default::default()
    };
    for object in &result.objects {
        let [left, top, right, bottom] = &object.corners;
        set.object_labels.push(object.label.clone());
        set.left.push(point(left));
        set.top.push(point(top));
        set.right.push(point(right));
        set.bottom.push(point(bottom));
    }
    set
}
