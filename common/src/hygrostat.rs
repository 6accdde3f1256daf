use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::{
    config::HygrostatConfig,
    error::HygrostatError,
    humidifier::{Capabilities, HumidifierDevice},
    number::NumberRange,
    types::{
        coerce_f32, HumidifierAction, HygrostatStatus, OperationMode, Personality, Preset,
        StoredState,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineAction {
    TurnOn,
    TurnOff,
    ArmKeepAlive(u64),
    CancelKeepAlive,
}

/// What the controller knows about the switch it drives.
#[derive(Debug, Clone, Copy, Default)]
struct ActuatorTracking {
    reported: bool,
    reported_on: bool,
    commanded_on: bool,
    last_change_ms: Option<u64>,
}

/// Minimum-cycle gate: true once `min_cycle_ms` has passed since the last
/// actuator change, or when either side is unknown.
pub fn cycle_elapsed(now_ms: u64, last_change_ms: Option<u64>, min_cycle_ms: Option<u64>) -> bool {
    match (last_change_ms, min_cycle_ms) {
        (Some(last), Some(min_cycle)) => now_ms.saturating_sub(last) >= min_cycle,
        _ => true,
    }
}

/// Parses a raw sensor value. "unknown", "unavailable", empty and
/// non-numeric values are rejected, as is anything outside 0..=100 %.
pub fn parse_humidity(raw: &str) -> Result<f32, HygrostatError> {
    let invalid = || HygrostatError::InvalidSensorReading(raw.to_string());
    let humidity = raw.trim().parse::<f32>().map_err(|_| invalid())?;
    if humidity.is_finite() && (0.0..=100.0).contains(&humidity) {
        Ok(humidity)
    } else {
        Err(invalid())
    }
}

#[derive(Debug, Clone)]
pub struct HygrostatEngine {
    pub config: HygrostatConfig,
    personality: Personality,
    range: NumberRange,

    mode: OperationMode,
    target_humidity: f32,
    saved_target: Option<f32>,
    preset: Preset,
    current_humidity: Option<f32>,

    actuator: ActuatorTracking,
    keep_alive_armed: bool,
}

impl HygrostatEngine {
    pub fn new(config: HygrostatConfig) -> Self {
        let personality = config.personality();
        let mode = match config.initial_mode {
            Some(mode) if mode.is_active() => personality.active_mode(),
            _ => OperationMode::Off,
        };

        Self {
            personality,
            range: config.humidity_range(),
            mode,
            target_humidity: config.default_target_humidity(),
            saved_target: None,
            preset: Preset::None,
            current_humidity: None,
            actuator: ActuatorTracking::default(),
            keep_alive_armed: false,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn personality(&self) -> Personality {
        self.personality
    }

    pub fn mode(&self) -> OperationMode {
        self.mode
    }

    pub fn target_humidity(&self) -> f32 {
        self.target_humidity
    }

    pub fn current_humidity(&self) -> Option<f32> {
        self.current_humidity
    }

    pub fn preset(&self) -> Preset {
        self.preset
    }

    pub fn saved_target(&self) -> Option<f32> {
        self.saved_target
    }

    pub fn range(&self) -> NumberRange {
        self.range
    }

    pub fn is_actuator_on(&self) -> bool {
        self.actuator.reported_on
    }

    pub fn is_keep_alive_armed(&self) -> bool {
        self.keep_alive_armed
    }

    /// Seeds mode, target and preset from a previous run. Only fields the
    /// configuration leaves unset are taken from the snapshot; nothing is
    /// evaluated until the next sensor update or command.
    pub fn restore(&mut self, stored: &StoredState) {
        if self.config.initial_mode.is_none() {
            match stored.mode.parse::<OperationMode>() {
                Ok(mode) if mode.is_active() => self.mode = self.personality.active_mode(),
                Ok(_) => self.mode = OperationMode::Off,
                Err(_) => warn!(
                    "{}: {}",
                    self.config.name,
                    HygrostatError::RestoreDataMalformed(format!("mode {:?}", stored.mode))
                ),
            }
        }

        if self.config.target_humidity.is_none() {
            if let Some(value) = &stored.target_humidity {
                match coerce_f32(value).map(|target| self.range.coerce(target)) {
                    Some(Ok(target)) => self.target_humidity = target,
                    _ => warn!(
                        "{}: {}, keeping {}",
                        self.config.name,
                        HygrostatError::RestoreDataMalformed(format!("target humidity {value}")),
                        self.target_humidity
                    ),
                }
            }
        }

        match stored.preset.as_deref().map(str::parse::<Preset>) {
            Some(Ok(Preset::Away)) if self.config.away_humidity.is_some() => {
                self.preset = Preset::Away;
                self.saved_target = Some(self.config.default_target_humidity());
            }
            Some(Ok(Preset::Away)) => warn!(
                "{}: ignoring restored away preset, no away humidity configured",
                self.config.name
            ),
            Some(Err(err)) => warn!("{}: {err}", self.config.name),
            Some(Ok(Preset::None)) | None => {}
        }
    }

    /// Setup pass run by the host once the controller is registered.
    pub fn start(&mut self, now_ms: u64) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        if self.mode.is_active() {
            self.arm_keep_alive(&mut actions);
        }
        self.control(now_ms, false, &mut actions);
        actions
    }

    pub fn on_sensor_update(&mut self, raw: &str, now_ms: u64) -> Vec<EngineAction> {
        let humidity = match parse_humidity(raw) {
            Ok(humidity) => humidity,
            Err(err) => {
                warn!("{}: dropping {err}", self.config.name);
                return Vec::new();
            }
        };

        self.current_humidity = Some(humidity);
        let mut actions = Vec::new();
        self.control(now_ms, false, &mut actions);
        actions
    }

    /// Host notification that the actuator switch changed (or was first seen).
    pub fn on_actuator_state(&mut self, is_on: bool, changed_at_ms: u64) {
        let changed = !self.actuator.reported || self.actuator.reported_on != is_on;
        self.actuator.reported = true;
        self.actuator.reported_on = is_on;
        self.actuator.commanded_on = is_on;
        if changed {
            self.actuator.last_change_ms = Some(changed_at_ms);
        }
    }

    pub fn set_target_humidity(
        &mut self,
        humidity: f32,
        now_ms: u64,
    ) -> Result<Vec<EngineAction>, HygrostatError> {
        self.target_humidity = self.range.coerce(humidity)?;

        let mut actions = Vec::new();
        self.control(now_ms, false, &mut actions);
        Ok(actions)
    }

    pub fn set_mode(
        &mut self,
        mode: OperationMode,
        now_ms: u64,
    ) -> Result<Vec<EngineAction>, HygrostatError> {
        if mode.is_active() && mode != self.personality.active_mode() {
            return Err(HygrostatError::UnsupportedMode(mode));
        }

        let mut actions = Vec::new();
        self.mode = mode;

        if mode.is_active() {
            self.arm_keep_alive(&mut actions);
            self.control(now_ms, true, &mut actions);
        } else {
            self.cancel_keep_alive(&mut actions);
            if self.actuator.reported_on || self.actuator.commanded_on {
                self.command(false, now_ms, &mut actions);
            }
        }

        Ok(actions)
    }

    pub fn set_preset(
        &mut self,
        preset: Preset,
        now_ms: u64,
    ) -> Result<Vec<EngineAction>, HygrostatError> {
        match preset {
            Preset::Away => {
                let Some(away) = self.config.away_humidity else {
                    return Err(HygrostatError::UnsupportedPreset(
                        Preset::Away.as_str().to_string(),
                    ));
                };
                if self.preset == Preset::Away {
                    return Ok(Vec::new());
                }
                self.saved_target = Some(self.target_humidity);
                self.target_humidity = self.range.coerce(away)?;
                self.preset = Preset::Away;
            }
            Preset::None => {
                if self.preset != Preset::Away {
                    return Ok(Vec::new());
                }
                if let Some(saved) = self.saved_target.take() {
                    self.target_humidity = saved;
                }
                self.preset = Preset::None;
            }
        }

        let mut actions = Vec::new();
        self.control(now_ms, true, &mut actions);
        Ok(actions)
    }

    /// Re-asserts the last commanded actuator state. Not subject to the
    /// cycle gate and does not count as an actuator change.
    pub fn on_keep_alive_tick(&mut self) -> Vec<EngineAction> {
        if !self.mode.is_active() || !self.keep_alive_armed {
            return Vec::new();
        }

        if self.actuator.commanded_on {
            vec![EngineAction::TurnOn]
        } else {
            vec![EngineAction::TurnOff]
        }
    }

    pub fn action(&self) -> HumidifierAction {
        if !self.mode.is_active() {
            HumidifierAction::Off
        } else if self.actuator.reported_on {
            self.personality.running_action()
        } else {
            HumidifierAction::Idle
        }
    }

    pub fn status(&self) -> HygrostatStatus {
        HygrostatStatus {
            name: self.config.name.clone(),
            mode: self.mode.as_str(),
            personality: self.personality.as_str(),
            target_humidity: self.target_humidity,
            current_humidity: self.current_humidity,
            preset: self.preset.as_str(),
            preset_modes: self.preset_modes().into_iter().map(Preset::as_str).collect(),
            operation_modes: self
                .operation_modes()
                .into_iter()
                .map(OperationMode::as_str)
                .collect(),
            min_humidity: self.range.min,
            max_humidity: self.range.max,
            target_step: self.range.step(),
            action: self.action().as_str(),
            actuator_on: self.actuator.reported_on,
            keep_alive_armed: self.keep_alive_armed,
        }
    }

    pub fn stored_state(&self, saved_at: DateTime<Utc>) -> StoredState {
        StoredState {
            mode: self.mode.as_str().to_string(),
            target_humidity: Some(serde_json::json!(self.target_humidity)),
            preset: Some(self.preset.as_str().to_string()),
            saved_at: Some(saved_at),
        }
    }

    fn control(&mut self, now_ms: u64, force: bool, actions: &mut Vec<EngineAction>) {
        if !self.mode.is_active() {
            return;
        }
        let Some(humidity) = self.current_humidity else {
            return;
        };
        let Some(desired) = self.personality.desired_state(
            humidity,
            self.target_humidity,
            self.config.dry_tolerance,
            self.config.wet_tolerance,
        ) else {
            return;
        };

        if desired == self.actuator.reported_on {
            self.actuator.commanded_on = desired;
            return;
        }

        if !force
            && !cycle_elapsed(
                now_ms,
                self.actuator.last_change_ms,
                self.config.min_cycle_duration_ms,
            )
        {
            debug!(
                "{}: holding actuator {} until the minimum cycle elapses",
                self.config.name,
                if self.actuator.reported_on { "on" } else { "off" }
            );
            return;
        }

        self.command(desired, now_ms, actions);
    }

    fn command(&mut self, on: bool, now_ms: u64, actions: &mut Vec<EngineAction>) {
        actions.push(if on {
            EngineAction::TurnOn
        } else {
            EngineAction::TurnOff
        });
        self.actuator.commanded_on = on;
        self.actuator.last_change_ms = Some(now_ms);
    }

    fn arm_keep_alive(&mut self, actions: &mut Vec<EngineAction>) {
        if let Some(period_ms) = self.config.keep_alive_ms {
            if !self.keep_alive_armed {
                self.keep_alive_armed = true;
                actions.push(EngineAction::ArmKeepAlive(period_ms));
            }
        }
    }

    fn cancel_keep_alive(&mut self, actions: &mut Vec<EngineAction>) {
        if self.keep_alive_armed {
            self.keep_alive_armed = false;
            actions.push(EngineAction::CancelKeepAlive);
        }
    }
}

impl HumidifierDevice for HygrostatEngine {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            target_humidity: true,
            preset_mode: self.config.away_humidity.is_some(),
            ..Capabilities::default()
        }
    }

    fn operation_mode(&self) -> OperationMode {
        self.mode
    }

    fn operation_modes(&self) -> Vec<OperationMode> {
        vec![self.personality.active_mode(), OperationMode::Off]
    }

    fn current_humidity(&self) -> Option<f32> {
        self.current_humidity
    }

    fn target_humidity(&self) -> Option<f32> {
        Some(self.target_humidity)
    }

    fn min_humidity(&self) -> f32 {
        self.range.min
    }

    fn max_humidity(&self) -> f32 {
        self.range.max
    }

    fn humidifier_action(&self) -> Option<HumidifierAction> {
        Some(self.action())
    }

    fn preset_mode(&self) -> Option<Preset> {
        Some(self.preset)
    }

    fn preset_modes(&self) -> Vec<Preset> {
        if self.config.away_humidity.is_some() {
            vec![Preset::None, Preset::Away]
        } else {
            Vec::new()
        }
    }
}
