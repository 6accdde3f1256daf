use std::{sync::Arc, time::Duration};

use anyhow::Context;
use rumqttc::{AsyncClient, Event, Incoming, QoS};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};

use hygrostat_common::{
    parse_switch_payload, sensor_state_topic, switch_set_topic, switch_state_topic, NetworkConfig,
    Personality, PAYLOAD_OFF, PAYLOAD_ON,
};

const AMBIENT_HUMIDITY: f32 = 40.0;
/// Every Nth reading is published as "unknown" to exercise dropout handling.
const DROPOUT_EVERY: u64 = 12;

/// Simulated room: one humidity sensor and the switch that drives a
/// humidifier or a dryer.
#[derive(Debug, Clone)]
struct Room {
    personality: Personality,
    humidity: f32,
    switch_on: bool,
}

impl Room {
    fn new(personality: Personality) -> Self {
        Self {
            personality,
            humidity: AMBIENT_HUMIDITY,
            switch_on: false,
        }
    }

    fn step(&mut self) -> f32 {
        if self.switch_on {
            match self.personality {
                Personality::Humidify => self.humidity += 0.8,
                Personality::Dry => self.humidity -= 0.8,
            }
        } else {
            self.humidity += (AMBIENT_HUMIDITY - self.humidity).clamp(-0.3, 0.3);
        }
        self.humidity = self.humidity.clamp(0.0, 100.0);
        self.humidity
    }
}

fn reading_payload(tick: u64, humidity: f32) -> String {
    if tick % DROPOUT_EVERY == 0 {
        "unknown".to_string()
    } else {
        format!("{humidity:.1}")
    }
}

/// Publishes the retained switch state for every accepted command, outside
/// the event loop task.
fn spawn_switch_echo(
    mqtt: AsyncClient,
    state_topic: String,
    mut inbox: mpsc::UnboundedReceiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(on) = inbox.recv().await {
            let state = if on { PAYLOAD_ON } else { PAYLOAD_OFF };
            if let Err(err) = mqtt
                .publish(state_topic.as_str(), QoS::AtLeastOnce, true, state)
                .await
            {
                warn!("switch state publish failed: {err}");
            }
        }
    })
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let network = NetworkConfig {
        mqtt_host: "127.0.0.1".to_string(),
        ..NetworkConfig::default()
    }
    .with_env_overrides();
    let sensor_id = std::env::var("SENSOR_ID").unwrap_or_else(|_| "humidity".to_string());
    let actuator_id = std::env::var("ACTUATOR_ID").unwrap_or_else(|_| "humidifier".to_string());
    let personality = Personality::from_dry_mode(
        std::env::var("SIMULATED_DEVICE").is_ok_and(|device| device.eq_ignore_ascii_case("dry")),
    );
    let period = std::env::var("SENSOR_INTERVAL_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(30);

    let mut mqtt_options =
        rumqttc::MqttOptions::new("hygrostat-sensor", network.mqtt_host, network.mqtt_port);
    if !network.mqtt_user.is_empty() {
        mqtt_options.set_credentials(network.mqtt_user, network.mqtt_pass);
    }

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);
    mqtt.subscribe(switch_set_topic(&actuator_id), QoS::AtMostOnce)
        .await
        .context("failed to subscribe to switch commands")?;

    let room = Arc::new(Mutex::new(Room::new(personality)));

    let (echoes, echo_inbox) = mpsc::unbounded_channel();
    spawn_switch_echo(mqtt.clone(), switch_state_topic(&actuator_id), echo_inbox);

    {
        let room = room.clone();
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::Publish(message))) => {
                        let payload = String::from_utf8_lossy(&message.payload);
                        let Some(on) = parse_switch_payload(&payload) else {
                            warn!("ignoring switch command {payload:?}");
                            continue;
                        };
                        room.lock().await.switch_on = on;
                        if echoes.send(on).is_err() {
                            warn!("switch echo task stopped");
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!("sensor mqtt poll error: {err}");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });
    }

    mqtt.publish(
        switch_state_topic(&actuator_id),
        QoS::AtLeastOnce,
        true,
        PAYLOAD_OFF,
    )
    .await
    .context("failed to publish initial switch state")?;

    info!(
        "simulating {} on {sensor_id}/{actuator_id}",
        personality.as_str()
    );

    let sensor_topic = sensor_state_topic(&sensor_id);
    let mut tick: u64 = 0;
    let mut interval = tokio::time::interval(Duration::from_secs(period));

    loop {
        interval.tick().await;
        tick = tick.saturating_add(1);

        let humidity = room.lock().await.step();
        mqtt.publish(
            sensor_topic.as_str(),
            QoS::AtLeastOnce,
            true,
            reading_payload(tick, humidity),
        )
        .await
        .context("failed to publish humidity reading")?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_room_drifts_towards_ambient() {
        let mut room = Room::new(Personality::Humidify);
        room.humidity = 50.0;

        assert!((room.step() - 49.7).abs() < 1e-4);
        for _ in 0..100 {
            room.step();
        }
        assert!((room.humidity - AMBIENT_HUMIDITY).abs() < 1e-4);
    }

    #[test]
    fn running_switch_moves_humidity_by_personality() {
        let mut humidifier = Room::new(Personality::Humidify);
        humidifier.switch_on = true;
        assert!(humidifier.step() > AMBIENT_HUMIDITY);

        let mut dryer = Room::new(Personality::Dry);
        dryer.switch_on = true;
        dryer.humidity = 0.5;
        assert_eq!(dryer.step(), 0.0);
    }

    #[tokio::test]
    async fn switch_echo_publishes_each_command() {
        let options = rumqttc::MqttOptions::new("hygrostat-sensor-test", "127.0.0.1", 1883);
        let (mqtt, mut eventloop) = AsyncClient::new(options, 8);
        let (echoes, inbox) = mpsc::unbounded_channel();
        let echo = spawn_switch_echo(mqtt, switch_state_topic("fan"), inbox);

        echoes.send(true).unwrap();
        echoes.send(false).unwrap();
        drop(echoes);
        echo.await.unwrap();

        eventloop.clean();
        let mut published = Vec::new();
        for request in eventloop.pending.drain(..) {
            if let rumqttc::Request::Publish(publish) = request {
                assert_eq!(publish.topic, "hygrostat/switch/fan/state");
                assert!(publish.retain);
                published.push(String::from_utf8_lossy(&publish.payload).into_owned());
            }
        }
        assert_eq!(published, vec![PAYLOAD_ON, PAYLOAD_OFF]);
    }

    #[test]
    fn periodic_dropouts() {
        assert_eq!(reading_payload(1, 41.26), "41.3");
        assert_eq!(reading_payload(DROPOUT_EVERY, 41.26), "unknown");
    }
}
