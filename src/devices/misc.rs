use super::{field_map, tag_map, DeviceSchema, Reading, RecordHeader};
use crate::point::FieldValue;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DanfossCFRThermostat {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub id: i64,
    #[serde(rename = "temperature_C", alias = "temperature_c")]
    pub temperature_c: f64,
    #[serde(rename = "setpoint_C", alias = "setpoint_c")]
    pub setpoint_c: f64,
    pub switch: String,
}

impl DeviceSchema for DanfossCFRThermostat {
    const MODEL: &'static str = "Danfoss CFR Thermostat";
}

impl Reading for DanfossCFRThermostat {
    fn header(&self) -> &RecordHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut RecordHeader {
        &mut self.header
    }

    fn measurement(&self) -> &'static str {
        "DanfossCFRThermostat"
    }

    fn tags(&self) -> BTreeMap<String, String> {
        tag_map([
            ("id", self.id.to_string()),
            ("switch", self.switch.clone()),
        ])
    }

    fn fields(&self) -> BTreeMap<String, FieldValue> {
        field_map([
            ("temperature_C", self.temperature_c.into()),
            ("setpoint_C", self.setpoint_c.into()),
        ])
    }
}

/// Keyless entry fob. Carries no measurements, only the button code as a tag.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Akhan100F14 {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub id: i64,
    pub data: String,
}

impl DeviceSchema for Akhan100F14 {
    const MODEL: &'static str = "Akhan 100F14 remote keyless entry";
}

impl Reading for Akhan100F14 {
    fn header(&self) -> &RecordHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut RecordHeader {
        &mut self.header
    }

    fn measurement(&self) -> &'static str {
        "Akhan100F14"
    }

    fn tags(&self) -> BTreeMap<String, String> {
        tag_map([("id", self.id.to_string()), ("data", self.data.clone())])
    }

    // Line protocol needs at least one field.
    fn fields(&self) -> BTreeMap<String, FieldValue> {
        field_map([("event", 1i64.into())])
    }
}
