use super::{field_map, tag_map, DeviceSchema, Reading, RecordHeader};
use crate::point::FieldValue;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AmbientWeather {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub rtl_433_id: i64,
    pub device: i64,
    pub channel: i64,
    pub battery: String,
    #[serde(alias = "temperature_F")]
    pub temperature_f: f64,
    pub humidity: i64,
}

impl DeviceSchema for AmbientWeather {
    const MODEL: &'static str = "Ambient Weather F007TH Thermo-Hygrometer";
}

impl Reading for AmbientWeather {
    fn header(&self) -> &RecordHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut RecordHeader {
        &mut self.header
    }

    fn measurement(&self) -> &'static str {
        "AmbientWeather"
    }

    fn tags(&self) -> BTreeMap<String, String> {
        tag_map([
            ("rtl_433_id", self.rtl_433_id.to_string()),
            ("device", self.device.to_string()),
            ("channel", self.channel.to_string()),
            ("battery", self.battery.clone()),
        ])
    }

    fn fields(&self) -> BTreeMap<String, FieldValue> {
        field_map([
            ("temperature_f", self.temperature_f.into()),
            ("humidity", self.humidity.into()),
        ])
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Bresser3CHSensor {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub id: i64,
    pub channel: String,
    pub battery: String,
    #[serde(rename = "temperature_F", alias = "temperature_f")]
    pub temperature_f: f64,
    pub humidity: i64,
    pub mic: String,
}

impl DeviceSchema for Bresser3CHSensor {
    const MODEL: &'static str = "Bresser 3CH sensor";
}

impl Reading for Bresser3CHSensor {
    fn header(&self) -> &RecordHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut RecordHeader {
        &mut self.header
    }

    fn measurement(&self) -> &'static str {
        "Bresser3CHSensor"
    }

    fn tags(&self) -> BTreeMap<String, String> {
        tag_map([
            ("id", self.id.to_string()),
            ("channel", self.channel.clone()),
            ("battery", self.battery.clone()),
        ])
    }

    fn fields(&self) -> BTreeMap<String, FieldValue> {
        field_map([
            ("temperature_F", self.temperature_f.into()),
            ("humidity", self.humidity.into()),
        ])
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CalibeurRF104 {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub id: i64,
    #[serde(rename = "temperature_C", alias = "temperature_c")]
    pub temperature_c: f64,
    pub humidity: i64,
    pub mic: String,
}

impl DeviceSchema for CalibeurRF104 {
    const MODEL: &'static str = "Calibeur RF-104";
}

impl Reading for CalibeurRF104 {
    fn header(&self) -> &RecordHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut RecordHeader {
        &mut self.header
    }

    fn measurement(&self) -> &'static str {
        "CalibeurRF104"
    }

    fn tags(&self) -> BTreeMap<String, String> {
        tag_map([("id", self.id.to_string())])
    }

    fn fields(&self) -> BTreeMap<String, FieldValue> {
        field_map([
            ("temperature_C", self.temperature_c.into()),
            ("humidity", self.humidity.into()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::super::Decoder;
    use crate::point::{FieldValue, Precision};

    #[test]
    fn ambient_weather_line_protocol() {
        let line = br#"{"time" : "2017-12-25 08:00:00", "model" : "Ambient Weather F007TH Thermo-Hygrometer", "device" : 117, "channel" : 1, "temperature_F" : 71.6, "humidity" : 31, "battery" : "OK", "rtl_433_id" : 0}"#;
        let reading = Decoder::with_builtin_devices().decode(line).unwrap();
        let point = reading.to_point(None).unwrap();

        assert_eq!(point.fields["temperature_f"], FieldValue::Float(71.6));
        assert_eq!(
            point.to_line_protocol(Precision::Seconds),
            "AmbientWeather,battery=OK,channel=1,device=117,model=Ambient\\ Weather\\ F007TH\\ Thermo-Hygrometer,rtl_433_id=0 humidity=31i,temperature_f=71.6 1514188800"
        );
    }
}
