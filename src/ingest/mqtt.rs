//! MQTT consumer feeding the [`Ingestor`].
//!
//! Subscribes to `<base>/+/+` and hands every publish to the ingestor in
//! arrival order. The consumer returns when the broker connection or the
//! storage connection is lost; restarting it is the caller's job.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tracing::{debug, info};
use uuid::Uuid;

use super::{Disposition, Ingestor};

// ---

/// Broker settings for one consumer.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub base_topic: String,
    pub qos: u8,
}

impl MqttConfig {
    /// Wildcard subscription covering every `<category>/<sub_id>` pair.
    pub fn subscription(&self) -> String {
        format!("{}/+/+", self.base_topic.trim_end_matches('/'))
    }
}

fn qos_level(level: u8) -> Result<QoS> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(anyhow!("Invalid MQTT QoS level {other}, expected 0, 1 or 2")),
    }
}

/// Run one consumer until its broker or storage connection fails.
pub async fn run(config: &MqttConfig, ingestor: &Ingestor) -> Result<()> {
    // ---
    let client_id = format!("sensorwatch-ingester-{}", Uuid::new_v4().simple());
    let mut options = MqttOptions::new(client_id, config.broker.clone(), config.port);
    options.set_keep_alive(Duration::from_secs(60));

    let (client, mut eventloop) = AsyncClient::new(options, 64);
    let topic = config.subscription();
    client
        .subscribe(topic.clone(), qos_level(config.qos)?)
        .await
        .context("Failed to queue MQTT subscription")?;

    let (mut stored, mut dropped) = (0u64, 0u64);
    loop {
        let event = eventloop.poll().await.with_context(|| {
            format!(
                "MQTT connection to {}:{} failed",
                config.broker, config.port
            )
        })?;

        match event {
            Event::Incoming(Packet::ConnAck(_)) => {
                info!(broker = %config.broker, port = config.port, %topic, "MQTT connected");
            }
            Event::Incoming(Packet::Publish(publish)) => {
                match ingestor.handle(&publish.topic, &publish.payload).await? {
                    Disposition::Stored(_) => stored += 1,
                    Disposition::Rejected(_) | Disposition::WriteFailed(_) => dropped += 1,
                }
                debug!(stored, dropped, "Ingestion counters");
            }
            _ => {}
        }
    }
}
