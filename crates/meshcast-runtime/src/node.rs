//! The spatial mapper node.
//!
//! [`MapperNode`] is a single-task actor: it owns a [`SpatialMapper`] and is
//! the only code that touches it, so mesh updates, pose samples and
//! detection sets are applied strictly one at a time without locks.
//!
//! | Inbound lane | Handler | Outbound |
//! |---|---|---|
//! | [`Topic::SpatialMap`] | mesh upsert / removal | – |
//! | [`Topic::HeadsetPose`] | pose recorded | – |
//! | [`Topic::ObjectDetections`] | assemble 3D boxes | [`Topic::ObjectDetections3d`] |
//!
//! Every failure is logged and the offending input dropped; the node itself
//! only stops when the shutdown signal fires or every bus lane closes.

use std::sync::Arc;

use chrono::Utc;
use meshcast_middleware::{EventBus, Topic, TopicReceiver};
use meshcast_perception::{ImageSize, PerceptionError, SpatialMapper};
use meshcast_types::{
    Event, EventPayload, HeadsetPoseData, ObjectDetection2dSet, SpatialMesh, Time,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn};

use crate::convert;

/// Source tag on events the node publishes.
pub const NODE_SOURCE: &str = "meshcast-runtime::mapper";

pub struct MapperNode {
    bus: Arc<EventBus>,
    mapper: SpatialMapper,
    meshes: TopicReceiver,
    poses: TopicReceiver,
    detections: TopicReceiver,
}

impl MapperNode {
    /// Subscribe to the three inbound lanes.  Events published after this
    /// call are delivered once [`run`][Self::run] starts.
    pub fn new(bus: Arc<EventBus>, image: ImageSize) -> Self {
        let meshes = bus.subscribe_to(Topic::SpatialMap);
        let poses = bus.subscribe_to(Topic::HeadsetPose);
        let detections = bus.subscribe_to(Topic::ObjectDetections);
        Self {
            bus,
            mapper: SpatialMapper::new(image),
            meshes,
            poses,
            detections,
        }
    }

    pub fn mapper(&self) -> &SpatialMapper {
        &self.mapper
    }

    /// Process events until `shutdown` flips to `true` or the bus closes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            width = self.mapper.image().width,
            height = self.mapper.image().height,
            "mapper node started"
        );
        loop {
            // Lanes are polled in order: a queued detection set is only taken
            // once every mesh and pose published ahead of it has been applied.
            let received = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    // A dropped sender also means shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                r = self.meshes.recv() => r,
                r = self.poses.recv() => r,
                r = self.detections.recv() => r,
            };
            match received {
                Ok(event) => self.handle_event(event),
                Err(RecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "mapper node lagged; events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!(
            meshes = self.mapper.meshes().len(),
            poses = self.mapper.poses().len(),
            "mapper node stopped"
        );
    }

    /// Apply one bus event.
    pub fn handle_event(&mut self, event: Event) {
        match event.payload {
            EventPayload::SpatialMesh(mesh) => self.on_mesh(&mesh),
            EventPayload::HeadsetPose(pose) => self.on_pose(&pose),
            EventPayload::ObjectDetections(set) => self.on_detections(&set),
            EventPayload::ObjectDetections3d(_) => {}
        }
    }

    fn on_mesh(&mut self, mesh: &SpatialMesh) {
        let (vertices, triangles) = convert::mesh_geometry(mesh);
        // Rejections are logged by the aggregator.
        if let Ok(outcome) = self
            .mapper
            .on_mesh(mesh.mesh_id.clone(), vertices, triangles, mesh.removal)
        {
            debug!(
                mesh_id = %mesh.mesh_id,
                ?outcome,
                fragments = self.mapper.meshes().len(),
                "spatial map updated"
            );
        }
    }

    fn on_pose(&mut self, pose: &HeadsetPoseData) {
        self.mapper.on_pose(convert::pose_record(pose));
    }

    fn on_detections(&mut self, set: &ObjectDetection2dSet) {
        let span = info_span!(
            "detection_set",
            stamp = ?set.source_stamp,
            frame_id = %set.header.frame_id,
            objects = set.num_detections,
        );
        let _enter = span.enter();

        let detections = match convert::detection_2d(set) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "dropping malformed detection set");
                return;
            }
        };

        let result = match self.mapper.on_detections(&detections) {
            Ok(Some(result)) => result,
            Ok(None) => {
                debug!("no detections to project");
                return;
            }
            Err(e @ PerceptionError::MissingPose(_)) => {
                info!(error = %e, "dropping detection set");
                let buffered: Vec<String> =
                    self.mapper.poses().stamps().map(|s| s.to_string()).collect();
                debug!(?buffered, "buffered pose stamps");
                return;
            }
            Err(e @ PerceptionError::NoIntersection { .. }) => {
                info!(error = %e, "dropping detection set");
                return;
            }
            Err(e) => {
                warn!(error = %e, "dropping detection set");
                return;
            }
        };

        let out = convert::detection_3d_set(&result, Time::from_datetime(Utc::now()));
        info!(resolved = out.num_objects, "publishing 3D detections");
        let event = Event::new(NODE_SOURCE, EventPayload::ObjectDetections3d(out));
        if let Err(e) = self.bus.publish(event) {
            debug!(error = %e, "3D detections had no listeners");
        }
    }
}
