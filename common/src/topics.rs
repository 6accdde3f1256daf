pub const TOPIC_PREFIX: &str = "hygrostat";

pub const TOPIC_SENSOR_WILDCARD: &str = "hygrostat/sensor/+/state";
pub const TOPIC_SWITCH_STATE_WILDCARD: &str = "hygrostat/switch/+/state";
pub const TOPIC_CMD_WILDCARD: &str = "hygrostat/cmnd/+/+";

pub const PAYLOAD_ON: &str = "ON";
pub const PAYLOAD_OFF: &str = "OFF";

pub fn sensor_state_topic(sensor_id: &str) -> String {
    format!("{TOPIC_PREFIX}/sensor/{sensor_id}/state")
}

pub fn switch_set_topic(actuator_id: &str) -> String {
    format!("{TOPIC_PREFIX}/switch/{actuator_id}/set")
}

pub fn switch_state_topic(actuator_id: &str) -> String {
    format!("{TOPIC_PREFIX}/switch/{actuator_id}/state")
}

pub fn command_topic(name: &str, service: &str) -> String {
    format!("{TOPIC_PREFIX}/cmnd/{name}/{service}")
}

pub fn hygrostat_state_topic(name: &str) -> String {
    format!("{TOPIC_PREFIX}/{name}/state")
}

/// Incoming topics the controller routes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic<'a> {
    SensorState { sensor_id: &'a str },
    SwitchSet { actuator_id: &'a str },
    SwitchState { actuator_id: &'a str },
    Command { name: &'a str, service: &'a str },
}

impl<'a> Topic<'a> {
    pub fn parse(topic: &'a str) -> Option<Self> {
        let rest = topic.strip_prefix(TOPIC_PREFIX)?.strip_prefix('/')?;
        let parts: Vec<&str> = rest.split('/').collect();

        match *parts.as_slice() {
            ["sensor", sensor_id, "state"] => Some(Self::SensorState { sensor_id }),
            ["switch", actuator_id, "set"] => Some(Self::SwitchSet { actuator_id }),
            ["switch", actuator_id, "state"] => Some(Self::SwitchState { actuator_id }),
            ["cmnd", name, service] => Some(Self::Command { name, service }),
            _ => None,
        }
    }
}

/// Switch payloads are matched case-insensitively; anything else is ignored.
pub fn parse_switch_payload(payload: &str) -> Option<bool> {
    match payload.trim().to_ascii_uppercase().as_str() {
        PAYLOAD_ON | "TRUE" | "1" => Some(true),
        PAYLOAD_OFF | "FALSE" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_and_parses_topics() {
        let sensor = sensor_state_topic("bathroom");
        assert_eq!(sensor, "hygrostat/sensor/bathroom/state");
        assert_eq!(
            Topic::parse(&sensor),
            Some(Topic::SensorState {
                sensor_id: "bathroom"
            })
        );

        let command = command_topic("cellar", "set_humidity");
        assert_eq!(
            Topic::parse(&command),
            Some(Topic::Command {
                name: "cellar",
                service: "set_humidity"
            })
        );

        assert_eq!(
            Topic::parse(&switch_state_topic("fan")),
            Some(Topic::SwitchState { actuator_id: "fan" })
        );
        assert_eq!(Topic::parse(&hygrostat_state_topic("cellar")), None);
        assert_eq!(Topic::parse("thermostat/sensor/x/state"), None);
    }

    #[test]
    fn switch_payloads() {
        assert_eq!(parse_switch_payload("ON"), Some(true));
        assert_eq!(parse_switch_payload(" off "), Some(false));
        assert_eq!(parse_switch_payload("toggle"), None);
    }
}
