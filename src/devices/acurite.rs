use super::{field_map, tag_map, DeviceSchema, Reading, RecordHeader};
use crate::point::FieldValue;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AcuRiteTowerSensor {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub id: i64,
    pub sensor_id: i64,
    pub channel: String,
    #[serde(rename = "temperature_C", alias = "temperature_c")]
    pub temperature_c: f64,
    pub humidity: i64,
    pub battery_low: i64,
}

impl DeviceSchema for AcuRiteTowerSensor {
    const MODEL: &'static str = "Acurite tower sensor";
}

impl Reading for AcuRiteTowerSensor {
    fn header(&self) -> &RecordHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut RecordHeader {
        &mut self.header
    }

    fn measurement(&self) -> &'static str {
        "AcuRiteTowerSensor"
    }

    fn tags(&self) -> BTreeMap<String, String> {
        tag_map([
            ("id", self.id.to_string()),
            ("sensor_id", self.sensor_id.to_string()),
            ("channel", self.channel.clone()),
            ("battery_low", self.battery_low.to_string()),
        ])
    }

    fn fields(&self) -> BTreeMap<String, FieldValue> {
        field_map([
            ("temperature_C", self.temperature_c.into()),
            ("humidity", self.humidity.into()),
        ])
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AcuRite5n1Sensor {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub sensor_id: i64,
    pub channel: String,
    pub sequence_num: i64,
    pub battery: String,
    pub message_type: i64,
    pub wind_speed_mph: f64,
    pub wind_dir_deg: f64,
    pub wind_dir: String,
    pub rainfall_accumulation_inch: f64,
    pub raincounter_raw: i64,
}

impl DeviceSchema for AcuRite5n1Sensor {
    const MODEL: &'static str = "Acurite 5n1 sensor";
}

impl Reading for AcuRite5n1Sensor {
    fn header(&self) -> &RecordHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut RecordHeader {
        &mut self.header
    }

    fn measurement(&self) -> &'static str {
        "AcuRite5n1Sensor"
    }

    fn tags(&self) -> BTreeMap<String, String> {
        tag_map([
            ("sensor_id", self.sensor_id.to_string()),
            ("channel", self.channel.clone()),
            ("sequence_num", self.sequence_num.to_string()),
            ("battery", self.battery.clone()),
            ("message_type", self.message_type.to_string()),
            ("wind_dir", self.wind_dir.clone()),
        ])
    }

    fn fields(&self) -> BTreeMap<String, FieldValue> {
        field_map([
            ("wind_speed_mph", self.wind_speed_mph.into()),
            ("wind_dir_deg", self.wind_dir_deg.into()),
            (
                "rainfall_accumulation_inch",
                self.rainfall_accumulation_inch.into(),
            ),
            ("raincounter_raw", self.raincounter_raw.into()),
        ])
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AcuRiteRainGauge {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub id: i64,
    pub rain: f64,
}

impl DeviceSchema for AcuRiteRainGauge {
    const MODEL: &'static str = "Acurite Rain Gauge";
}

impl Reading for AcuRiteRainGauge {
    fn header(&self) -> &RecordHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut RecordHeader {
        &mut self.header
    }

    fn measurement(&self) -> &'static str {
        "AcuRiteRainGauge"
    }

    fn tags(&self) -> BTreeMap<String, String> {
        tag_map([("id", self.id.to_string())])
    }

    fn fields(&self) -> BTreeMap<String, FieldValue> {
        field_map([("rain_mm", self.rain.into())])
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AcuRiteLightning6045M {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub id: i64,
    pub channel: String,
    #[serde(rename = "temperature_F", alias = "temperature_f")]
    pub temperature_f: f64,
    pub humidity: i64,
    pub strike_count: i64,
    pub storm_dist: i64,
    #[serde(rename = "active")]
    pub active_mode: i64,
    pub rfi: i64,
    pub ussb1: i64,
    pub battery: String,
    pub exception: i64,
}

impl DeviceSchema for AcuRiteLightning6045M {
    const MODEL: &'static str = "Acurite Lightning 6045M";
}

impl Reading for AcuRiteLightning6045M {
    fn header(&self) -> &RecordHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut RecordHeader {
        &mut self.header
    }

    fn measurement(&self) -> &'static str {
        "AcuRiteLightning6045M"
    }

    fn tags(&self) -> BTreeMap<String, String> {
        tag_map([
            ("id", self.id.to_string()),
            ("channel", self.channel.clone()),
            ("active_mode", self.active_mode.to_string()),
            ("rfi", self.rfi.to_string()),
            ("ussb1", self.ussb1.to_string()),
            ("battery", self.battery.clone()),
            ("exception", self.exception.to_string()),
        ])
    }

    fn fields(&self) -> BTreeMap<String, FieldValue> {
        field_map([
            ("temperature_F", self.temperature_f.into()),
            ("humidity", self.humidity.into()),
            ("strike_count", self.strike_count.into()),
            ("storm_dist", self.storm_dist.into()),
        ])
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AcuRite986Sensor {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub id: i64,
    pub channel: String,
    #[serde(rename = "temperature_F", alias = "temperature_f")]
    pub temperature_f: f64,
    pub battery: String,
    pub status: i64,
}

impl DeviceSchema for AcuRite986Sensor {
    const MODEL: &'static str = "Acurite 986 Sensor";
}

impl Reading for AcuRite986Sensor {
    fn header(&self) -> &RecordHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut RecordHeader {
        &mut self.header
    }

    fn measurement(&self) -> &'static str {
        "AcuRite986Sensor"
    }

    fn tags(&self) -> BTreeMap<String, String> {
        tag_map([
            ("id", self.id.to_string()),
            ("channel", self.channel.clone()),
            ("status", self.status.to_string()),
            ("battery", self.battery.clone()),
        ])
    }

    fn fields(&self) -> BTreeMap<String, FieldValue> {
        field_map([("temperature_F", self.temperature_f.into())])
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AcuRite606TXSensor {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub id: i64,
    pub battery: String,
    #[serde(alias = "temperature_C")]
    pub temperature_c: f64,
}

impl DeviceSchema for AcuRite606TXSensor {
    const MODEL: &'static str = "Acurite 606TX Sensor";
}

impl Reading for AcuRite606TXSensor {
    fn header(&self) -> &RecordHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut RecordHeader {
        &mut self.header
    }

    fn measurement(&self) -> &'static str {
        "AcuRite606TXSensor"
    }

    fn tags(&self) -> BTreeMap<String, String> {
        tag_map([
            ("id", self.id.to_string()),
            ("battery", self.battery.clone()),
        ])
    }

    fn fields(&self) -> BTreeMap<String, FieldValue> {
        field_map([("temperature_C", self.temperature_c.into())])
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AcuRite609TXCSensor {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub id: i64,
    pub battery: String,
    pub status: i64,
    #[serde(alias = "temperature_C")]
    pub temperature_c: f64,
    pub humidity: i64,
}

impl DeviceSchema for AcuRite609TXCSensor {
    const MODEL: &'static str = "Acurite 609TXC Sensor";
}

impl Reading for AcuRite609TXCSensor {
    fn header(&self) -> &RecordHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut RecordHeader {
        &mut self.header
    }

    fn measurement(&self) -> &'static str {
        "AcuRite609TXCSensor"
    }

    fn tags(&self) -> BTreeMap<String, String> {
        tag_map([
            ("id", self.id.to_string()),
            ("status", self.status.to_string()),
            ("battery", self.battery.clone()),
        ])
    }

    fn fields(&self) -> BTreeMap<String, FieldValue> {
        field_map([
            ("temperature_C", self.temperature_c.into()),
            ("humidity", self.humidity.into()),
        ])
    }
}
