use std::{collections::BTreeMap, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use rumqttc::{AsyncClient, Event, Incoming, Publish, QoS};
use tokio::{net::TcpListener, sync::mpsc, task::JoinHandle};
use tracing::{info, warn};

use hygrostat_common::{
    hygrostat_state_topic, parse_switch_payload, HumidifierService, HygrostatConfig,
    HygrostatEngine, RuntimeConfig, Topic,
};

use crate::{
    http,
    mqtt::{self, MqttSink},
    runtime::HygrostatRuntime,
    store::{AppStore, StoredStates},
};

pub type Hygrostat = HygrostatRuntime<MqttSink>;

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;

#[derive(Clone)]
pub struct AppState {
    hygrostats: Arc<BTreeMap<String, Hygrostat>>,
    mqtt: AsyncClient,
    store: AppStore,
}

impl AppState {
    fn new(
        configs: Vec<HygrostatConfig>,
        states: &StoredStates,
        mqtt: AsyncClient,
        store: AppStore,
    ) -> Self {
        let sink = MqttSink::new(mqtt.clone());
        let hygrostats = configs
            .into_iter()
            .map(|config| {
                let mut engine = HygrostatEngine::new(config);
                if let Some(stored) = states.get(engine.name()) {
                    engine.restore(stored);
                }
                let name = engine.name().to_string();
                (name, HygrostatRuntime::new(engine, sink.clone()))
            })
            .collect();

        Self {
            hygrostats: Arc::new(hygrostats),
            mqtt,
            store,
        }
    }

    pub fn hygrostats(&self) -> impl Iterator<Item = &Hygrostat> {
        self.hygrostats.values()
    }

    pub fn hygrostat(&self, name: &str) -> Option<&Hygrostat> {
        self.hygrostats.get(name)
    }

    /// Persists the restore snapshot and publishes the new state after an
    /// accepted command.
    pub async fn commit(&self, hygrostat: &Hygrostat) {
        let stored = hygrostat.stored_state().await;
        if let Err(err) = self.store.save_state(hygrostat.name(), stored).await {
            warn!("{}: failed to persist state: {err:#}", hygrostat.name());
        }
        self.publish_state(hygrostat).await;
    }

    async fn publish_state(&self, hygrostat: &Hygrostat) {
        let payload = serde_json::to_vec(&http::view(hygrostat).await);
        match payload {
            Ok(body) => {
                if let Err(err) = self
                    .mqtt
                    .publish(
                        hygrostat_state_topic(hygrostat.name()),
                        QoS::AtLeastOnce,
                        true,
                        body,
                    )
                    .await
                {
                    warn!("{}: state publish failed: {err}", hygrostat.name());
                }
            }
            Err(err) => warn!("{}: state serialization failed: {err}", hygrostat.name()),
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::from_env();
    let runtime = load_runtime_config(&store).await;
    let states = store.load_states().await.unwrap_or_else(|err| {
        warn!("failed to load stored states: {err:#}");
        StoredStates::default()
    });

    let (configs, rejected) = runtime.valid_hygrostats();
    for err in rejected {
        warn!("skipping hygrostat: {err}");
    }
    if configs.is_empty() {
        warn!("no usable hygrostats configured");
    }

    let network = runtime.network.clone().with_env_overrides();
    let (mqtt, eventloop) =
        AsyncClient::new(mqtt::mqtt_options("hygrostat-controller", &network), 64);

    let app_state = AppState::new(configs, &states, mqtt, store);

    mqtt::subscribe_topics(&app_state.mqtt).await?;
    spawn_mqtt_loop(app_state.clone(), eventloop);

    for hygrostat in app_state.hygrostats() {
        hygrostat.start().await;
        info!(
            "{}: started, keep-alive {}",
            hygrostat.name(),
            if hygrostat.keep_alive_running() { "armed" } else { "off" }
        );
    }
    spawn_state_publish_loop(
        app_state.clone(),
        Duration::from_millis(runtime.state_publish_interval_ms.max(1_000)),
    );

    let app = http::router(app_state);

    let port = std::env::var("HYGROSTAT_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for shutdown signal: {err}");
            }
        })
        .await?;
    Ok(())
}

async fn load_runtime_config(store: &AppStore) -> RuntimeConfig {
    match store.load_runtime_config().await {
        Ok(Some(runtime)) => runtime,
        Ok(None) => {
            let runtime = RuntimeConfig::default();
            match store.save_runtime_config(&runtime).await {
                Ok(()) => info!("wrote default config to {}", store.runtime_path().display()),
                Err(err) => warn!("failed to write default config: {err:#}"),
            }
            runtime
        }
        Err(err) => {
            warn!("failed to load runtime config from store: {err:#}");
            RuntimeConfig::default()
        }
    }
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    let (messages, inbox) = mpsc::unbounded_channel();
    spawn_message_worker(app_state, inbox);

    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if messages.send(message).is_err() {
                        warn!("mqtt message worker stopped, dropping message");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

/// Handles incoming messages one at a time, off the task that polls the
/// event loop.
fn spawn_message_worker(
    app_state: AppState,
    mut inbox: mpsc::UnboundedReceiver<Publish>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = inbox.recv().await {
            if let Err(err) =
                handle_mqtt_message(&app_state, &message.topic, &message.payload).await
            {
                warn!("mqtt message handling error: {err:#}");
            }
        }
    })
}

fn spawn_state_publish_loop(app_state: AppState, period: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            for hygrostat in app_state.hygrostats() {
                app_state.publish_state(hygrostat).await;
            }
        }
    });
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: &str,
    payload: &[u8],
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = std::str::from_utf8(payload).context("non utf8 mqtt payload")?;

    match Topic::parse(topic) {
        Some(Topic::SensorState { sensor_id }) => {
            for hygrostat in app_state
                .hygrostats()
                .filter(|hygrostat| hygrostat.sensor_id() == sensor_id)
            {
                hygrostat.handle_sensor(message).await;
            }
        }
        Some(Topic::SwitchState { actuator_id }) => {
            let Some(is_on) = parse_switch_payload(message) else {
                warn!("ignoring switch state {message:?} for {actuator_id}");
                return Ok(());
            };
            for hygrostat in app_state
                .hygrostats()
                .filter(|hygrostat| hygrostat.actuator_id() == actuator_id)
            {
                hygrostat.handle_actuator_state(is_on).await;
            }
        }
        Some(Topic::Command { name, service }) => {
            let Some(hygrostat) = app_state.hygrostat(name) else {
                warn!("command for unknown hygrostat {name}");
                return Ok(());
            };
            let call = HumidifierService::from_payload(service, message)
                .with_context(|| format!("{name}: rejected {service} command"))?;
            hygrostat
                .dispatch(call)
                .await
                .with_context(|| format!("{name}: {service} failed"))?;
            app_state.commit(hygrostat).await;
        }
        Some(Topic::SwitchSet { .. }) | None => {}
    }

    Ok(())
}

#[cfg(test)]
impl AppState {
    /// State backed by a scratch data directory and an MQTT client whose
    /// event loop is never polled.
    pub fn for_tests(test: &str, configs: Vec<HygrostatConfig>) -> Self {
        let data_dir =
            std::env::temp_dir().join(format!("hygrostat-{test}-{}", std::process::id()));
        let network = hygrostat_common::NetworkConfig::default();
        let (mqtt, _eventloop) =
            AsyncClient::new(mqtt::mqtt_options("hygrostat-test", &network), 64);
        Self::new(configs, &StoredStates::default(), mqtt, AppStore::new(data_dir))
    }
}
