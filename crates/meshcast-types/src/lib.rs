use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// ROS `builtin_interfaces/Time`.  Equality is exact on both fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Time {
    pub sec: i32,
    pub nanosec: u32,
}

impl Time {
    pub fn new(sec: i32, nanosec: u32) -> Self {
        Self { sec, nanosec }
    }

    /// Wall-clock time converted to a ROS stamp.
    ///
    /// `sec` is 32-bit on the wire; instants outside its range saturate to
    /// the nearest representable second.
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        let secs = at.timestamp();
        let sec = i32::try_from(secs).unwrap_or(if secs < 0 { i32::MIN } else { i32::MAX });
        Self {
            sec,
            nanosec: at.timestamp_subsec_nanos(),
        }
    }
}

/// ROS `std_msgs/Header`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub stamp: Time,
    #[serde(default)]
    pub frame_id: String,
}

/// ROS `geometry_msgs/Point`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// ROS `shape_msgs/MeshTriangle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshTriangle {
    pub vertex_indices: [u32; 3],
}

/// ROS `shape_msgs/Mesh`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    #[serde(default)]
    pub vertices: Vec<Point>,
    #[serde(default)]
    pub triangles: Vec<MeshTriangle>,
}

/// One spatial-mapping surface update from the headset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpatialMesh {
    #[serde(default)]
    pub header: Header,
    pub mesh_id: String,
    #[serde(default)]
    pub removal: bool,
    #[serde(default)]
    pub mesh: Mesh,
}

/// Headset pose at the time a camera frame was captured.
///
/// Both matrices are row-major flattened 4×4 matrices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadsetPoseData {
    #[serde(default)]
    pub header: Header,
    pub world_matrix: [f64; 16],
    pub projection_matrix: [f64; 16],
}

/// A set of 2-D object detections for one camera frame.
///
/// `label_confidences` is the row-major flattened
/// `num_detections × label_vec.len()` confidence matrix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectDetection2dSet {
    #[serde(default)]
    pub header: Header,
    pub source_stamp: Time,
    #[serde(default)]
    pub label_vec: Vec<String>,
    pub num_detections: u32,
    #[serde(default)]
    pub left: Vec<f32>,
    #[serde(default)]
    pub right: Vec<f32>,
    #[serde(default)]
    pub top: Vec<f32>,
    #[serde(default)]
    pub bottom: Vec<f32>,
    #[serde(default)]
    pub label_confidences: Vec<f64>,
}

/// A set of detections resolved to world-space boxes.
///
/// `left`, `top`, `right` and `bottom` hold the corners projected from the
/// pixel corners (left,top), (left,bottom), (right,bottom) and (right,top)
/// respectively, one entry per object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectDetection3dSet {
    pub header: Header,
    pub source_stamp: Time,
    pub num_objects: u32,
    pub object_labels: Vec<String>,
    pub left: Vec<Point>,
    pub top: Vec<Point>,
    pub right: Vec<Point>,
    pub bottom: Vec<Point>,
}

/// Unified event wrapper for the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "meshcast-middleware::ros2/SpatialMapData"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    SpatialMesh(SpatialMesh),
    HeadsetPose(HeadsetPoseData),
    ObjectDetections(ObjectDetection2dSet),
    ObjectDetections3d(ObjectDetection3dSet),
}

/// Error type shared by the transport and runtime crates.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum MapperError {
    #[error("Malformed message: {0}")]
    Parsing(String),

    #[error("Event bus error: {0}")]
    Channel(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
