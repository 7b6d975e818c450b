//! rosbridge frame adapter.
//!
//! [`Ros2Adapter`] translates between `rosbridge_server`-style JSON frames
//! and typed [`EventBus`] traffic:
//!
//! * **Inbound** – `{"op":"publish","topic":…,"msg":…}` frames on the three
//!   subscribed ROS topics become [`EventPayload::SpatialMesh`],
//!   [`EventPayload::HeadsetPose`] and [`EventPayload::ObjectDetections`]
//!   events on their bus lanes.
//!
//! * **Outbound** – an [`ObjectDetection3dSet`] is rendered as a publish
//!   frame on the 3D detection topic.
//!
//! Topic names are configurable through [`TopicNames`].  Leading `/`s are
//! ignored when matching, so `SpatialMapData` and `/SpatialMapData` name the
//! same topic.

use std::sync::Arc;

use meshcast_types::{
    Event, EventPayload, HeadsetPoseData, MapperError, ObjectDetection2dSet,
    ObjectDetection3dSet, SpatialMesh,
};
use serde_json::{Value, json};
use tracing::trace;

use crate::bus::EventBus;

/// Maximum number of vertices accepted in a single mesh fragment.
pub const MAX_MESH_VERTICES: usize = 1 << 20;

/// Maximum number of triangles accepted in a single mesh fragment.
pub const MAX_MESH_TRIANGLES: usize = 2 << 20;

/// Maximum number of objects accepted in a single 2D detection set.
pub const MAX_DETECTIONS: usize = 1024;

/// Maximum number of class labels accepted in a single 2D detection set.
pub const MAX_LABELS: usize = 4096;

/// ROS topic names the adapter listens and publishes on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicNames {
    pub spatial_map: String,
    pub detections: String,
    pub detections_3d: String,
    pub pose: String,
}

impl Default for TopicNames {
    fn default() -> Self {
        Self {
            spatial_map: "SpatialMapData".to_string(),
            detections: "ObjectDetections".to_string(),
            detections_3d: "ObjectDetections3d".to_string(),
            pose: "HeadsetPoseData".to_string(),
        }
    }
}

/// Adapter between rosbridge JSON frames and the internal [`EventBus`].
pub struct Ros2Adapter {
    bus: Arc<EventBus>,
    topics: TopicNames,
}

impl Ros2Adapter {
    pub fn new(bus: Arc<EventBus>, topics: TopicNames) -> Self {
        Self { bus, topics }
    }

    pub fn topics(&self) -> &TopicNames {
        &self.topics
    }

    // ── Inbound ─────────────────────────────────────────────────────────────

    /// Parse one rosbridge text frame and publish its message on the bus.
    ///
    /// Returns the number of bus receivers handed the event.
    ///
    /// # Errors
    ///
    /// [`MapperError::Parsing`] for malformed JSON, an `op` other than
    /// `publish`, a topic the adapter does not subscribe to, or a message
    /// that fails validation.  [`MapperError::Channel`] when nothing on the
    /// bus listens to the topic's lane.
    pub fn ingest_frame(&self, text: &str) -> Result<usize, MapperError> {
        let frame: Value = serde_json::from_str(text)
            .map_err(|e| MapperError::Parsing(format!("invalid rosbridge frame: {e}")))?;

        let op = frame.get("op").and_then(Value::as_str).unwrap_or("");
        if op != "publish" {
            return Err(MapperError::Parsing(format!("unsupported op '{op}'")));
        }
        let topic = frame
            .get("topic")
            .and_then(Value::as_str)
            .ok_or_else(|| MapperError::Parsing("frame has no topic".to_string()))?;
        let msg = frame
            .get("msg")
            .cloned()
            .ok_or_else(|| MapperError::Parsing(format!("frame on '{topic}' has no msg")))?;

        let name = bare(topic);
        trace!(topic = name, bytes = text.len(), "rosbridge frame");

        if name == bare(&self.topics.spatial_map) {
            self.ingest_spatial_mesh(decode(topic, msg)?)
        } else if name == bare(&self.topics.pose) {
            self.ingest_pose(decode(topic, msg)?)
        } else if name == bare(&self.topics.detections) {
            self.ingest_detections(decode(topic, msg)?)
        } else {
            Err(MapperError::Parsing(format!("not subscribed to topic '{topic}'")))
        }
    }

    /// Publish a mesh fragment on [`Topic::SpatialMap`][crate::bus::Topic].
    pub fn ingest_spatial_mesh(&self, mesh: SpatialMesh) -> Result<usize, MapperError> {
        if mesh.mesh.vertices.len() > MAX_MESH_VERTICES {
            return Err(MapperError::Parsing(format!(
                "mesh '{}' has {} vertices, exceeding the limit of {}",
                mesh.mesh_id,
                mesh.mesh.vertices.len(),
                MAX_MESH_VERTICES,
            )));
        }
        if mesh.mesh.triangles.len() > MAX_MESH_TRIANGLES {
            return Err(MapperError::Parsing(format!(
                "mesh '{}' has {} triangles, exceeding the limit of {}",
                mesh.mesh_id,
                mesh.mesh.triangles.len(),
                MAX_MESH_TRIANGLES,
            )));
        }
        let source = self.source(&self.topics.spatial_map);
        self.bus.publish(Event::new(source, EventPayload::SpatialMesh(mesh)))
    }

    /// Publish a headset pose on [`Topic::HeadsetPose`][crate::bus::Topic].
    pub fn ingest_pose(&self, pose: HeadsetPoseData) -> Result<usize, MapperError> {
        let source = self.source(&self.topics.pose);
        self.bus.publish(Event::new(source, EventPayload::HeadsetPose(pose)))
    }

    /// Publish a 2D detection set on
    /// [`Topic::ObjectDetections`][crate::bus::Topic].
    pub fn ingest_detections(&self, set: ObjectDetection2dSet) -> Result<usize, MapperError> {
        if set.num_detections as usize > MAX_DETECTIONS {
            return Err(MapperError::Parsing(format!(
                "detection set has {} objects, exceeding the limit of {}",
                set.num_detections, MAX_DETECTIONS,
            )));
        }
        if set.label_vec.len() > MAX_LABELS {
            return Err(MapperError::Parsing(format!(
                "detection set has {} labels, exceeding the limit of {}",
                set.label_vec.len(),
                MAX_LABELS,
            )));
        }
        let source = self.source(&self.topics.detections);
        self.bus.publish(Event::new(source, EventPayload::ObjectDetections(set)))
    }

    // ── Outbound ────────────────────────────────────────────────────────────

    /// Render `set` as a rosbridge publish frame on the 3D detection topic.
    pub fn detections_3d_frame(&self, set: &ObjectDetection3dSet) -> Result<String, MapperError> {
        let msg = serde_json::to_value(set).map_err(|e| MapperError::Serialization(e.to_string()))?;
        let frame = json!({
            "op": "publish",
            "topic": self.topics.detections_3d,
            "msg": msg,
        });
        Ok(frame.to_string())
    }

    fn source(&self, topic: &str) -> String {
        format!("meshcast-middleware::ros2/{}", bare(topic))
    }
}

fn bare(topic: &str) -> &str {
    topic.trim_start_matches('/')
}

fn decode<T: serde::de::DeserializeOwned>(topic: &str, msg: Value) -> Result<T, MapperError> {
    serde_json::from_value(msg)
        .map_err(|e| MapperError::Parsing(format!("bad message on '{topic}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Topic;
    use meshcast_types::{Point, Time};

    fn make_adapter() -> (Arc<EventBus>, Ros2Adapter) {
        let bus = Arc::new(EventBus::default());
        let adapter = Ros2Adapter::new(Arc::clone(&bus), TopicNames::default());
        (bus, adapter)
    }

    const MESH_FRAME: &str = r#"{
        "op": "publish",
        "topic": "/SpatialMapData",
        "msg": {
            "header": {"stamp": {"sec": 1, "nanosec": 0}, "frame_id": "world"},
            "mesh_id": "fragment-7",
            "mesh": {
                "vertices": [{"x": 0, "y": 0, "z": 0}, {"x": 1, "y": 0, "z": 0}, {"x": 0, "y": 1, "z": 0}],
                "triangles": [{"vertex_indices": [0, 1, 2]}]
            }
        }
    }"#;

    #[tokio::test]
    async fn mesh_frame_lands_on_spatial_map_lane() {
        let (bus, adapter) = make_adapter();
        let mut rx = bus.subscribe_to(Topic::SpatialMap);

        assert_eq!(adapter.ingest_frame(MESH_FRAME).unwrap(), 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.source, "meshcast-middleware::ros2/SpatialMapData");
        let EventPayload::SpatialMesh(mesh) = event.payload else {
            panic!("expected SpatialMesh");
        };
        assert_eq!(mesh.mesh_id, "fragment-7");
        assert!(!mesh.removal);
        assert_eq!(mesh.mesh.triangles[0].vertex_indices, [0, 1, 2]);
    }

    #[tokio::test]
    async fn pose_frame_lands_on_pose_lane() {
        let (bus, adapter) = make_adapter();
        let mut rx = bus.subscribe_to(Topic::HeadsetPose);

        let identity = "[1,0,0,0, 0,1,0,0, 0,0,1,0, 0,0,0,1]";
        let frame = format!(
            r#"{{"op":"publish","topic":"HeadsetPoseData","msg":{{
                "header":{{"stamp":{{"sec":5,"nanosec":9}},"frame_id":"pv"}},
                "world_matrix":{identity},"projection_matrix":{identity}}}}}"#
        );
        adapter.ingest_frame(&frame).unwrap();

        let event = rx.recv().await.unwrap();
        let EventPayload::HeadsetPose(pose) = event.payload else {
            panic!("expected HeadsetPose");
        };
        assert_eq!(pose.header.stamp, Time::new(5, 9));
        assert_eq!(pose.world_matrix[15], 1.0);
    }

    #[tokio::test]
    async fn detection_frame_lands_on_detection_lane() {
        let (bus, adapter) = make_adapter();
        let mut rx = bus.subscribe_to(Topic::ObjectDetections);

        let frame = r#"{"op":"publish","topic":"/ObjectDetections","msg":{
            "header":{"frame_id":"pv"},
            "source_stamp":{"sec":3,"nanosec":0},
            "label_vec":["cup","chair"],
            "num_detections":1,
            "left":[10],"right":[20],"top":[5],"bottom":[15],
            "label_confidences":[0.9,0.1]}}"#;
        adapter.ingest_frame(frame).unwrap();

        let event = rx.recv().await.unwrap();
        let EventPayload::ObjectDetections(set) = event.payload else {
            panic!("expected ObjectDetections");
        };
        assert_eq!(set.num_detections, 1);
        assert_eq!(set.source_stamp, Time::new(3, 0));
        assert_eq!(set.label_vec, vec!["cup", "chair"]);
    }

    #[test]
    fn rejects_malformed_frames() {
        let (bus, adapter) = make_adapter();
        let _rx = bus.subscribe_to(Topic::SpatialMap);

        for frame in [
            "not json",
            r#"{"op":"subscribe","topic":"/SpatialMapData"}"#,
            r#"{"op":"publish","msg":{}}"#,
            r#"{"op":"publish","topic":"/SpatialMapData"}"#,
            r#"{"op":"publish","topic":"/SpatialMapData","msg":{"removal":true}}"#,
            r#"{"op":"publish","topic":"/cmd_vel","msg":{}}"#,
        ] {
            let result = adapter.ingest_frame(frame);
            assert!(
                matches!(result, Err(MapperError::Parsing(_))),
                "expected Parsing error for {frame}, got: {result:?}"
            );
        }
    }

    #[test]
    fn rejects_oversized_mesh() {
        let (bus, adapter) = make_adapter();
        let _rx = bus.subscribe_to(Topic::SpatialMap);

        let mut mesh = SpatialMesh {
            mesh_id: "huge".to_string(),
            ..Default::default()
        };
        mesh.mesh.vertices = vec![Point::default(); MAX_MESH_VERTICES + 1];
        assert!(matches!(
            adapter.ingest_spatial_mesh(mesh),
            Err(MapperError::Parsing(_))
        ));
    }

    #[test]
    fn rejects_oversized_detection_set() {
        let (bus, adapter) = make_adapter();
        let _rx = bus.subscribe_to(Topic::ObjectDetections);

        let set = ObjectDetection2dSet {
            num_detections: MAX_DETECTIONS as u32 + 1,
            ..Default::default()
        };
        assert!(matches!(
            adapter.ingest_detections(set),
            Err(MapperError::Parsing(_))
        ));
    }

    #[test]
    fn no_listener_is_channel_error() {
        let (_, adapter) = make_adapter();
        assert!(matches!(
            adapter.ingest_frame(MESH_FRAME),
            Err(MapperError::Channel(_))
        ));
    }

    #[test]
    fn custom_topic_names_are_honoured() {
        let bus = Arc::new(EventBus::default());
        let _rx = bus.subscribe_to(Topic::SpatialMap);
        let topics = TopicNames {
            spatial_map: "mesh".to_string(),
            ..TopicNames::default()
        };
        let adapter = Ros2Adapter::new(Arc::clone(&bus), topics);

        assert!(adapter.ingest_frame(MESH_FRAME).is_err());
        let renamed = MESH_FRAME.replace("/SpatialMapData", "/mesh");
        assert!(adapter.ingest_frame(&renamed).is_ok());
    }

    #[test]
    fn detections_3d_render_as_publish_frame() {
        let (_, adapter) = make_adapter();
        let set = ObjectDetection3dSet {
            num_objects: 1,
            object_labels: vec!["cup".to_string()],
            left: vec![Point::new(-1.0, 2.5, -2.0)],
            top: vec![Point::new(-1.0, 0.5, -2.0)],
            right: vec![Point::new(1.0, 0.5, -2.0)],
            bottom: vec![Point::new(1.0, 2.5, -2.0)],
            ..Default::default()
        };

        let frame: Value = serde_json::from_str(&adapter.detections_3d_frame(&set).unwrap()).unwrap();
        assert_eq!(frame["op"], "publish");
        assert_eq!(frame["topic"], "ObjectDetections3d");
        assert_eq!(frame["msg"]["num_objects"], 1);
        assert_eq!(frame["msg"]["object_labels"][0], "cup");
        assert_eq!(frame["msg"]["left"][0]["y"], 2.5);
    }
}
