use thiserror::Error;

use crate::types::OperationMode;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HygrostatError {
    #[error("invalid sensor reading: {0:?}")]
    InvalidSensorReading(String),

    #[error("invalid target humidity: {0}")]
    InvalidSetpoint(String),

    #[error("malformed restore data: {0}")]
    RestoreDataMalformed(String),

    #[error("operation mode {} is not supported by this device", .0.as_str())]
    UnsupportedMode(OperationMode),

    #[error("preset {0:?} is not supported by this device")]
    UnsupportedPreset(String),

    #[error("device does not support {0}")]
    UnsupportedFeature(&'static str),

    #[error("invalid service call: {0}")]
    InvalidServiceCall(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
