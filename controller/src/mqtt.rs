use std::time::Duration;

use anyhow::Context;
use rumqttc::{AsyncClient, MqttOptions, QoS};

use hygrostat_common::{
    switch_set_topic, NetworkConfig, PAYLOAD_OFF, PAYLOAD_ON, TOPIC_CMD_WILDCARD,
    TOPIC_SENSOR_WILDCARD, TOPIC_SWITCH_STATE_WILDCARD,
};

use crate::runtime::ActuatorSink;

pub fn mqtt_options(client_id: &str, network: &NetworkConfig) -> MqttOptions {
    let mut options = MqttOptions::new(client_id, network.mqtt_host.clone(), network.mqtt_port);
    options.set_keep_alive(Duration::from_secs(30));
    if !network.mqtt_user.is_empty() {
        options.set_credentials(network.mqtt_user.clone(), network.mqtt_pass.clone());
    }
    options
}

pub async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    let topics = [
        TOPIC_SENSOR_WILDCARD,
        TOPIC_SWITCH_STATE_WILDCARD,
        TOPIC_CMD_WILDCARD,
    ];

    for topic in topics {
        mqtt.subscribe(topic, QoS::AtMostOnce)
            .await
            .with_context(|| format!("failed to subscribe to {topic}"))?;
    }
    Ok(())
}

/// Drives switches by publishing `ON`/`OFF` to `hygrostat/switch/{id}/set`.
#[derive(Clone)]
pub struct MqttSink {
    client: AsyncClient,
}

impl MqttSink {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }

    async fn publish(&self, actuator_id: &str, payload: &'static str) -> anyhow::Result<()> {
        let topic = switch_set_topic(actuator_id);
        self.client
            .publish(topic.as_str(), QoS::AtLeastOnce, false, payload)
            .await
            .with_context(|| format!("failed to publish {payload} to {topic}"))
    }
}

impl ActuatorSink for MqttSink {
    async fn turn_on(&self, actuator_id: &str) -> anyhow::Result<()> {
        self.publish(actuator_id, PAYLOAD_ON).await
    }

    async fn turn_off(&self, actuator_id: &str) -> anyhow::Result<()> {
        self.publish(actuator_id, PAYLOAD_OFF).await
    }
}
