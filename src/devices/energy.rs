use super::{field_map, tag_map, DeviceSchema, Reading, RecordHeader};
use crate::point::FieldValue;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CurrentCostTX {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub dev_id: i64,
    pub power0: i64,
    pub power1: i64,
    pub power2: i64,
}

impl DeviceSchema for CurrentCostTX {
    const MODEL: &'static str = "CurrentCost TX";
}

impl Reading for CurrentCostTX {
    fn header(&self) -> &RecordHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut RecordHeader {
        &mut self.header
    }

    fn measurement(&self) -> &'static str {
        "CurrentCostTX"
    }

    fn tags(&self) -> BTreeMap<String, String> {
        tag_map([("dev_id", self.dev_id.to_string())])
    }

    fn fields(&self) -> BTreeMap<String, FieldValue> {
        field_map([
            ("power0", self.power0.into()),
            ("power1", self.power1.into()),
            ("power2", self.power2.into()),
        ])
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EfergyE2CT {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub id: i64,
    pub current: f64,
    pub battery: String,
    pub learn: String,
}

impl DeviceSchema for EfergyE2CT {
    const MODEL: &'static str = "Efergy e2 CT";
}

impl Reading for EfergyE2CT {
    fn header(&self) -> &RecordHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut RecordHeader {
        &mut self.header
    }

    fn measurement(&self) -> &'static str {
        "EfergyE2CT"
    }

    fn tags(&self) -> BTreeMap<String, String> {
        tag_map([
            ("id", self.id.to_string()),
            ("battery", self.battery.clone()),
            ("learn", self.learn.clone()),
        ])
    }

    fn fields(&self) -> BTreeMap<String, FieldValue> {
        field_map([
            ("current", self.current.into()),
            ("learn", self.learn.as_str().into()),
        ])
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EfergyOptical {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub pulses: i64,
    pub energy: f64,
}

impl DeviceSchema for EfergyOptical {
    const MODEL: &'static str = "Efergy Optical";
}

impl Reading for EfergyOptical {
    fn header(&self) -> &RecordHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut RecordHeader {
        &mut self.header
    }

    fn measurement(&self) -> &'static str {
        "EfergyOptical"
    }

    fn tags(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn fields(&self) -> BTreeMap<String, FieldValue> {
        field_map([
            ("pulses", self.pulses.into()),
            ("energy", self.energy.into()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::super::Decoder;
    use crate::point::FieldValue;

    #[test]
    fn current_cost_tags_by_device_id() {
        let line = br#"{"time" : "2019-01-10 10:00:00", "model" : "CurrentCost TX", "dev_id" : 1811, "power0" : 350, "power1" : 0, "power2" : 12}"#;
        let point = Decoder::with_builtin_devices()
            .decode(line)
            .unwrap()
            .to_point(None)
            .unwrap();

        assert_eq!(point.tags["dev_id"], "1811");
        assert_eq!(point.fields["power0"], FieldValue::Int(350));
        assert_eq!(point.fields["power2"], FieldValue::Int(12));
    }

    #[test]
    fn efergy_optical_has_only_model_tag() {
        let line = br#"{"time" : "2019-01-10 10:00:00", "model" : "Efergy Optical", "pulses" : 1024, "energy" : 1.25}"#;
        let point = Decoder::with_builtin_devices()
            .decode(line)
            .unwrap()
            .to_point(None)
            .unwrap();

        assert_eq!(point.tags.len(), 1);
        assert_eq!(point.fields["energy"], FieldValue::Float(1.25));
    }
}
