use serde::{Deserialize, Serialize};

use crate::{
    error::HygrostatError,
    number::NumberRange,
    types::{OperationMode, Personality},
};

pub const DEFAULT_MIN_HUMIDITY: f32 = 30.0;
pub const DEFAULT_MAX_HUMIDITY: f32 = 99.0;
pub const DEFAULT_TOLERANCE: f32 = 0.3;

fn default_min_humidity() -> f32 {
    DEFAULT_MIN_HUMIDITY
}

fn default_max_humidity() -> f32 {
    DEFAULT_MAX_HUMIDITY
}

fn default_tolerance() -> f32 {
    DEFAULT_TOLERANCE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HygrostatConfig {
    pub name: String,
    pub actuator_id: String,
    pub sensor_id: String,
    #[serde(default = "default_tolerance")]
    pub dry_tolerance: f32,
    #[serde(default = "default_tolerance")]
    pub wet_tolerance: f32,
    #[serde(default)]
    pub min_cycle_duration_ms: Option<u64>,
    #[serde(default)]
    pub keep_alive_ms: Option<u64>,
    #[serde(default)]
    pub away_humidity: Option<f32>,
    #[serde(default)]
    pub initial_mode: Option<OperationMode>,
    #[serde(default)]
    pub dry_mode: bool,
    #[serde(default = "default_min_humidity")]
    pub min_humidity: f32,
    #[serde(default = "default_max_humidity")]
    pub max_humidity: f32,
    #[serde(default)]
    pub target_humidity: Option<f32>,
}

impl HygrostatConfig {
    pub fn new(
        name: impl Into<String>,
        actuator_id: impl Into<String>,
        sensor_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            actuator_id: actuator_id.into(),
            sensor_id: sensor_id.into(),
            dry_tolerance: DEFAULT_TOLERANCE,
            wet_tolerance: DEFAULT_TOLERANCE,
            min_cycle_duration_ms: None,
            keep_alive_ms: None,
            away_humidity: None,
            initial_mode: None,
            dry_mode: false,
            min_humidity: DEFAULT_MIN_HUMIDITY,
            max_humidity: DEFAULT_MAX_HUMIDITY,
            target_humidity: None,
        }
    }

    pub fn personality(&self) -> Personality {
        Personality::from_dry_mode(self.dry_mode)
    }

    pub fn humidity_range(&self) -> NumberRange {
        NumberRange::new(self.min_humidity, self.max_humidity)
    }

    /// Configured set-point, or the personality's idle end of the range.
    pub fn default_target_humidity(&self) -> f32 {
        let fallback = match self.personality() {
            Personality::Humidify => self.min_humidity,
            Personality::Dry => self.max_humidity,
        };
        self.target_humidity
            .filter(|target| target.is_finite())
            .unwrap_or(fallback)
            .clamp(self.min_humidity, self.max_humidity)
    }

    pub fn validate(&self) -> Result<(), HygrostatError> {
        if self.name.trim().is_empty() {
            return Err(HygrostatError::InvalidConfig("name is required".into()));
        }
        if self.actuator_id.trim().is_empty() {
            return Err(HygrostatError::InvalidConfig(format!(
                "{}: actuator_id is required",
                self.name
            )));
        }
        if self.sensor_id.trim().is_empty() {
            return Err(HygrostatError::InvalidConfig(format!(
                "{}: sensor_id is required",
                self.name
            )));
        }

        for (field, value) in [
            ("dry_tolerance", self.dry_tolerance),
            ("wet_tolerance", self.wet_tolerance),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(HygrostatError::InvalidConfig(format!(
                    "{}: {field} must be a non-negative number",
                    self.name
                )));
            }
        }

        if !self.min_humidity.is_finite()
            || !self.max_humidity.is_finite()
            || self.min_humidity > self.max_humidity
        {
            return Err(HygrostatError::InvalidConfig(format!(
                "{}: min_humidity must not exceed max_humidity",
                self.name
            )));
        }

        if let Some(away) = self.away_humidity {
            if !away.is_finite() {
                return Err(HygrostatError::InvalidConfig(format!(
                    "{}: away_humidity must be a number",
                    self.name
                )));
            }
        }

        if self.min_cycle_duration_ms == Some(0) || self.keep_alive_ms == Some(0) {
            return Err(HygrostatError::InvalidConfig(format!(
                "{}: durations must be greater than zero",
                self.name
            )));
        }

        if let Some(mode) = self.initial_mode {
            if mode.is_active() && mode != self.personality().active_mode() {
                return Err(HygrostatError::UnsupportedMode(mode));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

impl NetworkConfig {
    /// `MQTT_HOST`, `MQTT_PORT`, `MQTT_USER` and `MQTT_PASS` win over stored values.
    pub fn with_env_overrides(self) -> Self {
        self.overridden_by(|key| std::env::var(key).ok())
    }

    pub fn overridden_by(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(host) = lookup("MQTT_HOST") {
            self.mqtt_host = host;
        }
        if let Some(port) = lookup("MQTT_PORT").and_then(|value| value.parse::<u16>().ok()) {
            self.mqtt_port = port;
        }
        if let Some(user) = lookup("MQTT_USER") {
            self.mqtt_user = user;
        }
        if let Some(pass) = lookup("MQTT_PASS") {
            self.mqtt_pass = pass;
        }
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub hygrostats: Vec<HygrostatConfig>,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default = "default_state_publish_interval_ms")]
    pub state_publish_interval_ms: u64,
}

fn default_state_publish_interval_ms() -> u64 {
    10_000
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            hygrostats: vec![HygrostatConfig::new(
                "hygrostat",
                "humidifier",
                "humidity",
            )],
            network: NetworkConfig::default(),
            state_publish_interval_ms: default_state_publish_interval_ms(),
        }
    }
}

impl RuntimeConfig {
    /// Splits configured hygrostats into usable ones and the rejections, also
    /// rejecting names that were already taken.
    pub fn valid_hygrostats(&self) -> (Vec<HygrostatConfig>, Vec<HygrostatError>) {
        let mut accepted: Vec<HygrostatConfig> = Vec::new();
        let mut rejected = Vec::new();

        for config in &self.hygrostats {
            if let Err(err) = config.validate() {
                rejected.push(err);
                continue;
            }
            if accepted.iter().any(|other| other.name == config.name) {
                rejected.push(HygrostatError::InvalidConfig(format!(
                    "duplicate hygrostat name {:?}",
                    config.name
                )));
                continue;
            }
            accepted.push(config.clone());
        }

        (accepted, rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_personality() {
        let humidifier = HygrostatConfig::new("test", "switch.test", "sensor.test");
        assert_eq!(humidifier.default_target_humidity(), 30.0);

        let dryer = HygrostatConfig {
            dry_mode: true,
            ..humidifier.clone()
        };
        assert_eq!(dryer.default_target_humidity(), 99.0);

        let explicit = HygrostatConfig {
            target_humidity: Some(42.0),
            min_humidity: 20.0,
            max_humidity: 65.0,
            ..humidifier
        };
        assert_eq!(explicit.default_target_humidity(), 42.0);
    }

    #[test]
    fn missing_actuator_is_rejected() {
        let config = HygrostatConfig::new("test", "", "sensor.test");
        assert!(matches!(
            config.validate(),
            Err(HygrostatError::InvalidConfig(_))
        ));
    }

    #[test]
    fn initial_mode_must_match_personality() {
        let config = HygrostatConfig {
            initial_mode: Some(OperationMode::Dry),
            ..HygrostatConfig::new("test", "switch.test", "sensor.test")
        };
        assert_eq!(
            config.validate(),
            Err(HygrostatError::UnsupportedMode(OperationMode::Dry))
        );
    }

    #[test]
    fn parses_minimal_json_with_defaults() {
        let config: HygrostatConfig = serde_json::from_str(
            r#"{"name":"test","actuator_id":"switch.test","sensor_id":"sensor.test"}"#,
        )
        .unwrap();

        assert_eq!(config.min_humidity, 30.0);
        assert_eq!(config.max_humidity, 99.0);
        assert_eq!(config.dry_tolerance, 0.3);
        assert_eq!(config.initial_mode, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_replace_network_settings() {
        let env = std::collections::HashMap::from([
            ("MQTT_HOST", "broker.local"),
            ("MQTT_PORT", "not-a-port"),
            ("MQTT_USER", "hygro"),
        ]);
        let network = NetworkConfig::default()
            .overridden_by(|key| env.get(key).map(|value| value.to_string()));

        assert_eq!(network.mqtt_host, "broker.local");
        assert_eq!(network.mqtt_port, 1883);
        assert_eq!(network.mqtt_user, "hygro");
        assert_eq!(network.mqtt_pass, "");
    }

    #[test]
    fn duplicate_names_are_skipped() {
        let runtime = RuntimeConfig {
            hygrostats: vec![
                HygrostatConfig::new("a", "switch.a", "sensor.a"),
                HygrostatConfig::new("a", "switch.b", "sensor.b"),
                HygrostatConfig::new("c", "switch.c", ""),
            ],
            ..RuntimeConfig::default()
        };

        let (accepted, rejected) = runtime.valid_hygrostats();
        assert_eq!(accepted.len(), 1);
        assert_eq!(rejected.len(), 2);
    }
}
