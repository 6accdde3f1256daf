//! Humidifier entity abstraction.
//!
//! Devices describe what they support with a [`Capabilities`] value instead
//! of feature bit flags. Hosts validate incoming service calls into a
//! [`HumidifierService`] and check the capability struct before dispatching.

use serde::Serialize;
use serde_json::Value;

use crate::{
    config::{DEFAULT_MAX_HUMIDITY, DEFAULT_MIN_HUMIDITY},
    error::HygrostatError,
    types::{coerce_f32, HumidifierAction, OperationMode, Preset},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct Capabilities {
    pub target_humidity: bool,
    pub preset_mode: bool,
    pub fan_mode: bool,
    pub current_temperature: bool,
    pub water_level: bool,
}

impl Capabilities {
    /// Feature a service call depends on, if it isn't supported here.
    pub fn missing_feature(&self, service: &HumidifierService) -> Option<&'static str> {
        match service {
            HumidifierService::SetHumidity(_) if !self.target_humidity => Some("target humidity"),
            HumidifierService::SetPresetMode(_) if !self.preset_mode => Some("preset modes"),
            HumidifierService::SetFanMode(_) if !self.fan_mode => Some("fan modes"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HumidifierAttributes {
    pub operation_modes: Vec<&'static str>,
    pub current_humidity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_humidity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_humidity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidifier_action: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fan_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fan_modes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset_mode: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset_modes: Option<Vec<&'static str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub water_level: Option<u8>,
}

pub trait HumidifierDevice {
    fn capabilities(&self) -> Capabilities;

    fn operation_mode(&self) -> OperationMode;

    fn operation_modes(&self) -> Vec<OperationMode>;

    fn current_humidity(&self) -> Option<f32> {
        None
    }

    fn target_humidity(&self) -> Option<f32> {
        None
    }

    fn min_humidity(&self) -> f32 {
        DEFAULT_MIN_HUMIDITY
    }

    fn max_humidity(&self) -> f32 {
        DEFAULT_MAX_HUMIDITY
    }

    fn humidifier_action(&self) -> Option<HumidifierAction> {
        None
    }

    fn preset_mode(&self) -> Option<Preset> {
        None
    }

    fn preset_modes(&self) -> Vec<Preset> {
        Vec::new()
    }

    fn fan_mode(&self) -> Option<String> {
        None
    }

    fn fan_modes(&self) -> Vec<String> {
        Vec::new()
    }

    fn current_temperature(&self) -> Option<f32> {
        None
    }

    fn water_level(&self) -> Option<u8> {
        None
    }

    fn state_attributes(&self) -> HumidifierAttributes {
        let capabilities = self.capabilities();
        let mut attributes = HumidifierAttributes {
            operation_modes: self
                .operation_modes()
                .into_iter()
                .map(OperationMode::as_str)
                .collect(),
            current_humidity: self.current_humidity(),
            humidity: None,
            min_humidity: None,
            max_humidity: None,
            humidifier_action: self.humidifier_action().map(HumidifierAction::as_str),
            fan_mode: None,
            fan_modes: None,
            preset_mode: None,
            preset_modes: None,
            current_temperature: None,
            water_level: None,
        };

        if capabilities.target_humidity {
            attributes.humidity = self.target_humidity();
            attributes.min_humidity = Some(self.min_humidity());
            attributes.max_humidity = Some(self.max_humidity());
        }
        if capabilities.fan_mode {
            attributes.fan_mode = self.fan_mode();
            attributes.fan_modes = Some(self.fan_modes());
        }
        if capabilities.preset_mode {
            attributes.preset_mode = self.preset_mode().map(Preset::as_str);
            attributes.preset_modes =
                Some(self.preset_modes().into_iter().map(Preset::as_str).collect());
        }
        if capabilities.current_temperature {
            attributes.current_temperature = self.current_temperature();
        }
        if capabilities.water_level {
            attributes.water_level = self.water_level();
        }

        attributes
    }

    /// Mode used to emulate `turn_on` for devices that only expose modes.
    fn turn_on_mode(&self) -> Option<OperationMode> {
        let modes = self.operation_modes();
        [OperationMode::Humidify, OperationMode::Dry]
            .into_iter()
            .find(|mode| modes.contains(mode))
    }

    fn turn_off_mode(&self) -> Option<OperationMode> {
        self.operation_modes()
            .contains(&OperationMode::Off)
            .then_some(OperationMode::Off)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HumidifierService {
    TurnOn,
    TurnOff,
    SetHumidity(f32),
    SetOperationMode(OperationMode),
    SetPresetMode(String),
    SetFanMode(String),
}

impl HumidifierService {
    /// Validates a service call by name and payload before it reaches a device.
    pub fn from_call(service: &str, data: &Value) -> Result<Self, HygrostatError> {
        match service {
            "turn_on" => Ok(Self::TurnOn),
            "turn_off" => Ok(Self::TurnOff),
            "set_humidity" => {
                let value = required(data, "humidity")?;
                coerce_f32(value)
                    .map(Self::SetHumidity)
                    .ok_or_else(|| HygrostatError::InvalidSetpoint(value.to_string()))
            }
            "set_operation_mode" => {
                required_str(data, "operation_mode")?
                    .parse()
                    .map(Self::SetOperationMode)
            }
            "set_preset_mode" => {
                required_str(data, "preset_mode").map(|value| Self::SetPresetMode(value.into()))
            }
            "set_fan_mode" => {
                required_str(data, "fan_mode").map(|value| Self::SetFanMode(value.into()))
            }
            other => Err(HygrostatError::InvalidServiceCall(format!(
                "unknown service {other:?}"
            ))),
        }
    }

    /// Parses an MQTT command payload: a JSON object is service data as-is,
    /// anything else is the bare value of the service's single field.
    pub fn from_payload(service: &str, payload: &str) -> Result<Self, HygrostatError> {
        let payload = payload.trim();
        let data = match serde_json::from_str::<Value>(payload) {
            Ok(data @ Value::Object(_)) => data,
            Ok(value) => wrap_value(service, value),
            Err(_) => wrap_value(service, Value::String(payload.to_string())),
        };
        Self::from_call(service, &data)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::TurnOn => "turn_on",
            Self::TurnOff => "turn_off",
            Self::SetHumidity(_) => "set_humidity",
            Self::SetOperationMode(_) => "set_operation_mode",
            Self::SetPresetMode(_) => "set_preset_mode",
            Self::SetFanMode(_) => "set_fan_mode",
        }
    }
}

fn wrap_value(service: &str, value: Value) -> Value {
    let key = match service {
        "set_humidity" => "humidity",
        "set_operation_mode" => "operation_mode",
        "set_preset_mode" => "preset_mode",
        "set_fan_mode" => "fan_mode",
        _ => return Value::Object(Default::default()),
    };
    let mut data = serde_json::Map::new();
    data.insert(key.to_string(), value);
    Value::Object(data)
}

fn required<'a>(data: &'a Value, key: &str) -> Result<&'a Value, HygrostatError> {
    data.get(key)
        .ok_or_else(|| HygrostatError::InvalidServiceCall(format!("{key} is required")))
}

fn required_str<'a>(data: &'a Value, key: &str) -> Result<&'a str, HygrostatError> {
    required(data, key)?
        .as_str()
        .ok_or_else(|| HygrostatError::InvalidServiceCall(format!("{key} must be a string")))
}
