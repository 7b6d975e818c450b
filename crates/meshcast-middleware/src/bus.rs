//! Typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! # Topics
//!
//! Traffic is partitioned into one [`Topic`] lane per message kind:
//!
//! | Topic | Payload | Producer |
//! |---|---|---|
//! | [`Topic::SpatialMap`] | [`EventPayload::SpatialMesh`] | headset, via the ROS 2 bridge |
//! | [`Topic::HeadsetPose`] | [`EventPayload::HeadsetPose`] | headset, via the ROS 2 bridge |
//! | [`Topic::ObjectDetections`] | [`EventPayload::ObjectDetections`] | 2D detector, via the ROS 2 bridge |
//! | [`Topic::ObjectDetections3d`] | [`EventPayload::ObjectDetections3d`] | mapper node |

use meshcast_types::{Event, EventPayload, MapperError};
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
pub const DEFAULT_CAPACITY: usize = 256;

/// Enumeration of all routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Incremental spatial-mesh fragments and removals.
    SpatialMap,
    /// One headset pose per captured camera frame.
    HeadsetPose,
    /// 2D detection sets in pixel space.
    ObjectDetections,
    /// Resolved world-space detection sets.
    ObjectDetections3d,
}

impl Topic {
    /// The lane a payload travels on.
    pub fn for_payload(payload: &EventPayload) -> Self {
        match payload {
            EventPayload::SpatialMesh(_) => Topic::SpatialMap,
            EventPayload::HeadsetPose(_) => Topic::HeadsetPose,
            EventPayload::ObjectDetections(_) => Topic::ObjectDetections,
            EventPayload::ObjectDetections3d(_) => Topic::ObjectDetections3d,
        }
    }
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    spatial_map: broadcast::Sender<Event>,
    headset_pose: broadcast::Sender<Event>,
    object_detections: broadcast::Sender<Event>,
    object_detections_3d: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let (spatial_map, _) = broadcast::channel(capacity);
        let (headset_pose, _) = broadcast::channel(capacity);
        let (object_detections, _) = broadcast::channel(capacity);
        let (object_detections_3d, _) = broadcast::channel(capacity);
        Self {
            spatial_map,
            headset_pose,
            object_detections,
            object_detections_3d,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event, or
    /// [`MapperError::Channel`] when nobody is subscribed to the topic.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, MapperError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| MapperError::Channel(format!("No subscribers for topic {topic:?}")))
    }

    /// Publish `event` on the lane matching its payload.
    pub fn publish(&self, event: Event) -> Result<usize, MapperError> {
        let topic = Topic::for_payload(&event.payload);
        self.publish_to(topic, event)
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Number of live receivers on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::SpatialMap => &self.spatial_map,
            Topic::HeadsetPose => &self.headset_pose,
            Topic::ObjectDetections => &self.object_detections,
            Topic::ObjectDetections3d => &self.object_detections_3d,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic-based receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.  The caller decides whether to
    ///   continue or abort.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`recv`][Self::recv].
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshcast_types::{HeadsetPoseData, ObjectDetection3dSet};

    fn pose_event(source: &str) -> Event {
        Event::new(
            source,
            EventPayload::HeadsetPose(HeadsetPoseData {
                header: Default::default(),
                world_matrix: [0.0; 16],
                projection_matrix: [0.0; 16],
            }),
        )
    }

    #[test]
    fn publish_no_subscribers_returns_error() {
        let bus = EventBus::default();
        let result = bus.publish_to(Topic::HeadsetPose, pose_event("test"));
        assert!(matches!(result, Err(MapperError::Channel(_))));
    }

    #[test]
    fn payloads_map_to_their_lanes() {
        let event = pose_event("test");
        assert_eq!(Topic::for_payload(&event.payload), Topic::HeadsetPose);
        let out = EventPayload::ObjectDetections3d(ObjectDetection3dSet::default());
        assert_eq!(Topic::for_payload(&out), Topic::ObjectDetections3d);
    }

    /// Two independent subscribers on the same topic both receive the event.
    #[tokio::test]
    async fn topic_multiple_subscribers_receive_same_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut subscriber1 = bus.subscribe_to(Topic::HeadsetPose);
        let mut subscriber2 = bus.subscribe_to(Topic::HeadsetPose);
        assert_eq!(bus.subscriber_count(Topic::HeadsetPose), 2);

        let event = pose_event("ros2::pose");
        assert_eq!(bus.publish_to(Topic::HeadsetPose, event.clone())?, 2);

        assert_eq!(subscriber1.recv().await?.id, event.id);
        assert_eq!(subscriber2.recv().await?.id, event.id);
        Ok(())
    }

    #[tokio::test]
    async fn publish_routes_by_payload() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut poses = bus.subscribe_to(Topic::HeadsetPose);
        let mut meshes = bus.subscribe_to(Topic::SpatialMap);

        let event = pose_event("ros2::pose");
        bus.publish(event.clone())?;

        assert_eq!(poses.recv().await?.id, event.id);
        assert!(meshes.try_recv().is_err());
        Ok(())
    }

    /// A subscriber on one lane must not receive events published to another.
    #[tokio::test]
    async fn topic_subscriber_does_not_receive_other_topic_events() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut detections = bus.subscribe_to(Topic::ObjectDetections);
        let _poses = bus.subscribe_to(Topic::HeadsetPose);

        bus.publish_to(Topic::HeadsetPose, pose_event("ros2::pose"))?;

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), detections.recv()).await;
        assert!(result.is_err(), "ObjectDetections subscriber must not receive a pose");
        assert_eq!(detections.topic(), Topic::ObjectDetections);
        Ok(())
    }

    /// Flooding a low-capacity channel while a subscriber sleeps must produce
    /// a `Lagged` error rather than panicking or blocking.
    #[tokio::test]
    async fn topic_channel_lag_on_slow_subscriber() {
        let bus = EventBus::new(16);
        let mut slow_sub = bus.subscribe_to(Topic::HeadsetPose);

        for _ in 0..1_000 {
            let _ = bus.publish_to(Topic::HeadsetPose, pose_event("flood::pose"));
        }

        let result = slow_sub.recv().await;
        assert!(
            matches!(result, Err(broadcast::error::RecvError::Lagged(_))),
            "expected Lagged error, got: {result:?}"
        );
    }
}
