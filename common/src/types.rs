use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HygrostatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Off,
    Humidify,
    Dry,
}

impl OperationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Humidify => "humidify",
            Self::Dry => "dry",
        }
    }

    pub fn is_active(self) -> bool {
        self != Self::Off
    }
}

impl FromStr for OperationMode {
    type Err = HygrostatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "humidify" => Ok(Self::Humidify),
            "dry" => Ok(Self::Dry),
            other => Err(HygrostatError::InvalidServiceCall(format!(
                "unknown operation mode {other:?}"
            ))),
        }
    }
}

/// Fixed role of the device behind the actuator switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Personality {
    Humidify,
    Dry,
}

impl Personality {
    pub fn from_dry_mode(dry_mode: bool) -> Self {
        if dry_mode {
            Self::Dry
        } else {
            Self::Humidify
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Humidify => "humidify",
            Self::Dry => "dry",
        }
    }

    pub fn active_mode(self) -> OperationMode {
        match self {
            Self::Humidify => OperationMode::Humidify,
            Self::Dry => OperationMode::Dry,
        }
    }

    pub fn running_action(self) -> HumidifierAction {
        match self {
            Self::Humidify => HumidifierAction::Humidifying,
            Self::Dry => HumidifierAction::Drying,
        }
    }

    /// Desired actuator state for a reading, or `None` while the reading sits
    /// inside `[target - dry_tolerance, target + wet_tolerance]`.
    pub fn desired_state(
        self,
        humidity: f32,
        target: f32,
        dry_tolerance: f32,
        wet_tolerance: f32,
    ) -> Option<bool> {
        let too_dry = humidity < target - dry_tolerance;
        let too_wet = humidity > target + wet_tolerance;

        match self {
            Self::Humidify if too_dry => Some(true),
            Self::Humidify if too_wet => Some(false),
            Self::Dry if too_wet => Some(true),
            Self::Dry if too_dry => Some(false),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    None,
    Away,
}

impl Preset {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Away => "away",
        }
    }
}

impl FromStr for Preset {
    type Err = HygrostatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "away" => Ok(Self::Away),
            other => Err(HygrostatError::UnsupportedPreset(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HumidifierAction {
    Off,
    Idle,
    Humidifying,
    Drying,
}

impl HumidifierAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Idle => "idle",
            Self::Humidifying => "humidifying",
            Self::Drying => "drying",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HygrostatStatus {
    pub name: String,
    pub mode: &'static str,
    pub personality: &'static str,
    #[serde(rename = "targetHumidity")]
    pub target_humidity: f32,
    #[serde(rename = "currentHumidity")]
    pub current_humidity: Option<f32>,
    pub preset: &'static str,
    #[serde(rename = "presetModes")]
    pub preset_modes: Vec<&'static str>,
    #[serde(rename = "operationModes")]
    pub operation_modes: Vec<&'static str>,
    #[serde(rename = "minHumidity")]
    pub min_humidity: f32,
    #[serde(rename = "maxHumidity")]
    pub max_humidity: f32,
    #[serde(rename = "targetStep")]
    pub target_step: f32,
    pub action: &'static str,
    #[serde(rename = "actuatorOn")]
    pub actuator_on: bool,
    #[serde(rename = "keepAliveArmed")]
    pub keep_alive_armed: bool,
}

/// Snapshot persisted by the host and handed back to `restore` on startup.
///
/// Values are loosely typed; `restore` coerces them and falls back to
/// configured defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredState {
    pub mode: String,
    #[serde(default)]
    pub target_humidity: Option<serde_json::Value>,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

/// Numeric coercion used for service data and restored attributes: numbers
/// and numeric strings are accepted, anything non-finite is not.
pub fn coerce_f32(value: &serde_json::Value) -> Option<f32> {
    let number = match value {
        serde_json::Value::Number(number) => number.as_f64()?,
        serde_json::Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    let number = number as f32;
    number.is_finite().then_some(number)
}
