pub mod config;
pub mod error;
pub mod humidifier;
pub mod hygrostat;
pub mod number;
pub mod topics;
pub mod types;

pub use config::{HygrostatConfig, NetworkConfig, RuntimeConfig};
pub use error::HygrostatError;
pub use humidifier::{Capabilities, HumidifierAttributes, HumidifierDevice, HumidifierService};
pub use hygrostat::{cycle_elapsed, parse_humidity, EngineAction, HygrostatEngine};
pub use number::{NumberMode, NumberRange};
pub use topics::*;
pub use types::{
    HumidifierAction, HygrostatStatus, OperationMode, Personality, Preset, StoredState,
};
