//! rosbridge-compatible WebSocket server.
//!
//! [`Ros2Bridge`] accepts WebSocket clients speaking the `rosbridge_server`
//! JSON protocol:
//!
//! 1. **Ingests** every text frame a client sends through the
//!    [`Ros2Adapter`], which publishes mesh, pose and detection messages
//!    onto the internal [`EventBus`].
//!
//! 2. **Pushes** every [`EventPayload::ObjectDetections3d`] event on the bus
//!    to every connected client as a rosbridge publish frame.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use meshcast_types::{EventPayload, MapperError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::bus::{EventBus, Topic};
use crate::ros2_adapter::Ros2Adapter;

#[derive(Clone)]
pub struct Ros2Bridge {
    bus: Arc<EventBus>,
    adapter: Arc<Ros2Adapter>,
}

impl Ros2Bridge {
    pub fn new(bus: Arc<EventBus>, adapter: Arc<Ros2Adapter>) -> Self {
        Self { bus, adapter }
    }

    /// Bind `addr` and serve clients until the task is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::Channel`] if the TCP listener cannot be bound.
    pub async fn run_ws_server(self, addr: SocketAddr) -> Result<(), MapperError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MapperError::Channel(format!("ws bind error on {addr}: {e}")))?;
        info!(%addr, "rosbridge server listening");
        self.serve(listener).await
    }

    /// Serve clients on an already-bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), MapperError> {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let bridge = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = bridge.handle_ws_client(stream, peer).await {
                            error!(peer = %peer, error = %e, "ws client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "ws accept error");
                }
            }
        }
    }

    async fn handle_ws_client(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), MapperError> {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| MapperError::Serialization(format!("ws handshake from {peer}: {e}")))?;
        info!(peer = %peer, "rosbridge client connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let mut rx = self.bus.subscribe_to(Topic::ObjectDetections3d);

        loop {
            tokio::select! {
                // Forward 3D detection sets to the client.
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            let EventPayload::ObjectDetections3d(set) = &event.payload else {
                                continue;
                            };
                            let frame = self.adapter.detections_3d_frame(set)?;
                            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            warn!(peer = %peer, lagged_by = n, "ws client lagged");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                // Feed inbound frames through the adapter.
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            debug!(peer = %peer, error = %e, "ws read error");
                            break;
                        }
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = self.adapter.ingest_frame(text.as_str()) {
                                warn!(peer = %peer, error = %e, "dropping inbound frame");
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        info!(peer = %peer, "rosbridge client disconnected");
        Ok(())
    }
}
