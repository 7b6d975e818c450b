//! `meshcast-middleware` – Transport for the spatial mapper.
//!
//! Moves messages between the headset-side ROS graph and the mapper node
//! without caring about their geometry.
//!
//! # Modules
//!
//! - [`bus`] – Typed, topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.
//! - [`ros2_adapter`] – Translates rosbridge JSON frames to and from bus
//!   events, with size limits on inbound messages.
//! - [`ros2_bridge`] – rosbridge-compatible WebSocket server that feeds the
//!   adapter and pushes resolved 3D detections back to clients.

pub mod bus;
pub mod ros2_adapter;
pub mod ros2_bridge;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use ros2_adapter::{Ros2Adapter, TopicNames};
pub use ros2_bridge::Ros2Bridge;
