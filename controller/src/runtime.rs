use std::{future::Future, sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info, warn};

use hygrostat_common::{
    EngineAction, HumidifierAttributes, HumidifierDevice, HumidifierService, HygrostatEngine,
    HygrostatError, HygrostatStatus, OperationMode, Preset, StoredState,
};

use crate::timer::KeepAliveTimer;

/// Where actuator commands go. Failures are reported back to the runtime,
/// which logs them and does not retry.
pub trait ActuatorSink: Clone + Send + Sync + 'static {
    fn turn_on(&self, actuator_id: &str) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn turn_off(&self, actuator_id: &str) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// One hygrostat wired to an actuator sink. Every event holds the engine lock
/// until its commands have reached the sink, so concurrent callers see
/// commands in the order the engine decided them.
#[derive(Clone)]
pub struct HygrostatRuntime<A: ActuatorSink> {
    name: Arc<str>,
    actuator_id: Arc<str>,
    sensor_id: Arc<str>,
    engine: Arc<Mutex<HygrostatEngine>>,
    sink: A,
    keep_alive: KeepAliveTimer,
    started_at: Instant,
}

impl<A: ActuatorSink> HygrostatRuntime<A> {
    pub fn new(engine: HygrostatEngine, sink: A) -> Self {
        Self {
            name: engine.config.name.as_str().into(),
            actuator_id: engine.config.actuator_id.as_str().into(),
            sensor_id: engine.config.sensor_id.as_str().into(),
            engine: Arc::new(Mutex::new(engine)),
            sink,
            keep_alive: KeepAliveTimer::default(),
            started_at: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn actuator_id(&self) -> &str {
        &self.actuator_id
    }

    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    pub async fn start(&self) {
        let mut engine = self.engine.lock().await;
        let actions = engine.start(self.now_ms());
        self.execute(actions).await;
        drop(engine);
    }

    pub async fn handle_sensor(&self, raw: &str) {
        let mut engine = self.engine.lock().await;
        let actions = engine.on_sensor_update(raw, self.now_ms());
        self.execute(actions).await;
        drop(engine);
    }

    pub async fn handle_actuator_state(&self, is_on: bool) {
        let mut engine = self.engine.lock().await;
        engine.on_actuator_state(is_on, self.now_ms());
    }

    pub async fn set_target_humidity(&self, humidity: f32) -> Result<(), HygrostatError> {
        let mut engine = self.engine.lock().await;
        let actions = engine.set_target_humidity(humidity, self.now_ms())?;
        self.execute(actions).await;
        drop(engine);
        Ok(())
    }

    pub async fn set_mode(&self, mode: OperationMode) -> Result<(), HygrostatError> {
        let mut engine = self.engine.lock().await;
        let actions = engine.set_mode(mode, self.now_ms())?;
        self.execute(actions).await;
        drop(engine);
        Ok(())
    }

    pub async fn set_preset(&self, preset: Preset) -> Result<(), HygrostatError> {
        let mut engine = self.engine.lock().await;
        let actions = engine.set_preset(preset, self.now_ms())?;
        self.execute(actions).await;
        drop(engine);
        Ok(())
    }

    /// Runs a validated service call, checking the device's capabilities first.
    pub async fn dispatch(&self, service: HumidifierService) -> Result<(), HygrostatError> {
        let (capabilities, turn_on_mode, turn_off_mode) = {
            let engine = self.engine.lock().await;
            (
                engine.capabilities(),
                engine.turn_on_mode(),
                engine.turn_off_mode(),
            )
        };
        if let Some(feature) = capabilities.missing_feature(&service) {
            return Err(HygrostatError::UnsupportedFeature(feature));
        }

        info!("{}: {}", self.name, service.name());
        match service {
            HumidifierService::TurnOn => {
                let mode = turn_on_mode.ok_or(HygrostatError::UnsupportedFeature("turn on"))?;
                self.set_mode(mode).await
            }
            HumidifierService::TurnOff => {
                let mode = turn_off_mode.ok_or(HygrostatError::UnsupportedFeature("turn off"))?;
                self.set_mode(mode).await
            }
            HumidifierService::SetHumidity(humidity) => self.set_target_humidity(humidity).await,
            HumidifierService::SetOperationMode(mode) => self.set_mode(mode).await,
            HumidifierService::SetPresetMode(preset) => self.set_preset(preset.parse()?).await,
            HumidifierService::SetFanMode(_) => {
                Err(HygrostatError::UnsupportedFeature("fan modes"))
            }
        }
    }

    pub async fn status(&self) -> HygrostatStatus {
        self.engine.lock().await.status()
    }

    pub async fn attributes(&self) -> HumidifierAttributes {
        self.engine.lock().await.state_attributes()
    }

    pub async fn stored_state(&self) -> StoredState {
        self.engine.lock().await.stored_state(Utc::now())
    }

    pub fn keep_alive_running(&self) -> bool {
        self.keep_alive.is_armed()
    }

    fn now_ms(&self) -> u64 {
        self.started_at
            .elapsed()
            .as_millis()
            .try_into()
            .unwrap_or(u64::MAX)
    }

    async fn execute(&self, actions: Vec<EngineAction>) {
        for action in actions {
            debug!("{}: engine action {action:?}", self.name);
            match action {
                EngineAction::TurnOn => self.send(true).await,
                EngineAction::TurnOff => self.send(false).await,
                EngineAction::ArmKeepAlive(period_ms) => self.arm_keep_alive(period_ms),
                EngineAction::CancelKeepAlive => self.keep_alive.cancel(),
            }
        }
    }

    fn arm_keep_alive(&self, period_ms: u64) {
        let runtime = self.clone();
        self.keep_alive
            .arm(Duration::from_millis(period_ms), move || {
                let runtime = runtime.clone();
                async move { runtime.keep_alive_tick().await }
            });
    }

    async fn keep_alive_tick(&self) {
        let mut engine = self.engine.lock().await;
        for action in engine.on_keep_alive_tick() {
            match action {
                EngineAction::TurnOn => self.send(true).await,
                EngineAction::TurnOff => self.send(false).await,
                EngineAction::ArmKeepAlive(_) | EngineAction::CancelKeepAlive => {}
            }
        }
        drop(engine);
    }

    async fn send(&self, on: bool) {
        let result = if on {
            self.sink.turn_on(&self.actuator_id).await
        } else {
            self.sink.turn_off(&self.actuator_id).await
        };

        if let Err(err) = result {
            warn!(
                "{}: failed to turn {} {}: {err:#}",
                self.name,
                if on { "on" } else { "off" },
                self.actuator_id
            );
        }
    }
}
