//! `meshcast-runtime` – Runs the spatial mapper against the event bus.
//!
//! # Modules
//!
//! - [`node`] – [`MapperNode`][node::MapperNode]: a single-task actor that
//!   owns the [`SpatialMapper`][meshcast_perception::SpatialMapper], consumes
//!   mesh, pose and detection lanes, and publishes resolved 3D detections.
//! - [`convert`] – wire message ⇄ geometry type conversions.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export
//!   to Jaeger, Grafana Tempo, or any OTLP-compatible collector.

pub mod convert;
pub mod node;
pub mod telemetry;

pub use node::MapperNode;
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
