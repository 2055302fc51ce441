//! Embedded MQTT broker.
//!
//! Devices publish events to `channel/<topic>[?field=value&...]` and
//! subscribe to `/channel/<topic>` for stored events. The broker runs on its
//! own threads; loggo attaches to it through an in-process link that both
//! receives inbound publishes and sends the republished events.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use rumqttd::local::{LinkRx, LinkTx};
use rumqttd::{Broker, Notification};
use serde_json::json;
use thiserror::Error;

use crate::pipeline::Pipeline;
use crate::publish::{EventPublisher, PublishError};

const LINK_CLIENT_ID: &str = "loggo-ingest";

/// Inbound ingestion topics. Republished events live under `/channel/`,
/// whose empty first level keeps them out of this filter.
const INGEST_FILTER: &str = "channel/#";

#[derive(Debug, Error)]
pub enum MqttError {
    #[error("invalid broker settings: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("failed to attach to broker: {0}")]
    Link(String),

    #[error("failed to spawn broker thread: {0}")]
    Thread(#[from] std::io::Error),
}

/// Handle to a running broker.
pub struct BrokerLink {
    /// Publishes onto the broker, for the pipeline's publisher.
    pub publisher: Arc<BrokerPublisher>,
    /// Inbound publishes under `channel/#`; drive with [`run_ingest_loop`].
    pub inbox: LinkRx,
}

/// Publishes events to broker subscribers through the in-process link.
pub struct BrokerPublisher {
    link: Mutex<LinkTx>,
}

impl EventPublisher for BrokerPublisher {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        let mut link = self
            .link
            .lock()
            .map_err(|_| PublishError::Unavailable("broker link lock poisoned".to_string()))?;
        link.try_publish(topic.to_string(), payload.to_vec())
            .map_err(|e| PublishError::Unavailable(e.to_string()))?;
        tracing::debug!(topic, "published event to mqtt broker");
        Ok(())
    }
}

fn broker_config(listen: SocketAddr, max_payload_size: usize) -> Result<rumqttd::Config, MqttError> {
    let config = serde_json::from_value(json!({
        "id": 0,
        "router": {
            "max_connections": 1024,
            "max_outgoing_packet_count": 200,
            "max_segment_size": 104_857_600,
            "max_segment_count": 10,
        },
        "v4": {
            "1": {
                "name": "loggo-v4",
                "listen": listen.to_string(),
                "next_connection_delay_ms": 1,
                "connections": {
                    "connection_timeout_ms": 60_000,
                    "max_payload_size": max_payload_size,
                    "max_inflight_count": 100,
                    "dynamic_filters": true,
                },
            },
        },
    }))?;
    Ok(config)
}

/// Starts an MQTT 3.1.1 broker listening on `listen`.
///
/// The broker keeps running on a dedicated thread for the life of the
/// process.
///
/// # Errors
///
/// Returns [`MqttError`] if the settings are rejected or the link to the
/// broker cannot be established.
pub fn start_broker(listen: SocketAddr, max_payload_size: usize) -> Result<BrokerLink, MqttError> {
    let mut broker = Broker::new(broker_config(listen, max_payload_size)?);
    let (mut link_tx, link_rx) = broker
        .link(LINK_CLIENT_ID)
        .map_err(|e| MqttError::Link(e.to_string()))?;
    link_tx
        .subscribe(INGEST_FILTER)
        .map_err(|e| MqttError::Link(e.to_string()))?;

    std::thread::Builder::new()
        .name("mqtt-broker".to_string())
        .spawn(move || {
            if let Err(e) = broker.start() {
                tracing::error!(error = ?e, "mqtt broker stopped");
            }
        })?;

    tracing::info!(%listen, filter = INGEST_FILTER, "mqtt broker started");
    Ok(BrokerLink {
        publisher: Arc::new(BrokerPublisher {
            link: Mutex::new(link_tx),
        }),
        inbox: link_rx,
    })
}

/// Feeds every inbound broker publish to the pipeline, one at a time.
///
/// Rejected messages are logged and dropped. Returns when the link closes.
pub async fn run_ingest_loop(mut inbox: LinkRx, pipeline: Arc<Pipeline>) {
    loop {
        let notification = match inbox.next().await {
            Ok(Some(notification)) => notification,
            Ok(None) => continue,
            Err(e) => {
                tracing::error!(error = ?e, "mqtt link closed, inbound ingestion stopped");
                return;
            }
        };

        let Notification::Forward(forward) = notification else {
            continue;
        };
        let topic = String::from_utf8_lossy(&forward.publish.topic).into_owned();
        match pipeline
            .ingest_mqtt(&topic, forward.publish.payload.to_vec())
            .await
        {
            Ok(event) => {
                tracing::debug!(%topic, event_id = event.id, "ingested mqtt message");
            }
            Err(e) => {
                tracing::warn!(%topic, error = %e, "rejected mqtt message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_settings_are_accepted() {
        let listen: SocketAddr = "127.0.0.1:1883".parse().unwrap();
        let config = broker_config(listen, 4096).unwrap();

        let servers = config.v4.expect("a v4 listener");
        let server = servers.get("1").unwrap();
        assert_eq!(server.listen, listen);
        assert_eq!(server.connections.max_payload_size, 4096);
    }
}
