//! Device record schemas and the decoder that dispatches on `model`.
//!
//! rtl_433 writes one JSON object per received transmission. Every object
//! carries a `model` and a `time`; the rest depends on the device. Each
//! supported device is a struct implementing [`Reading`], registered with the
//! [`Decoder`] under the model name rtl_433 reports.

mod acurite;
mod energy;
mod misc;
mod weather;

pub use acurite::{
    AcuRite5n1Sensor, AcuRite606TXSensor, AcuRite609TXCSensor, AcuRite986Sensor,
    AcuRiteLightning6045M, AcuRiteRainGauge, AcuRiteTowerSensor,
};
pub use energy::{CurrentCostTX, EfergyE2CT, EfergyOptical};
pub use misc::{Akhan100F14, DanfossCFRThermostat};
pub use weather::{AmbientWeather, Bresser3CHSensor, CalibeurRF104};

use crate::config::MetadataFieldSet;
use crate::point::{FieldValue, Point};
use chrono::NaiveDateTime;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

/// Layout of the `time` value rtl_433 writes (local wall clock, no zone).
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid record json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("invalid time {value:?}: {source}")]
    Time {
        value: String,
        source: chrono::ParseError,
    },
}

impl DecodeError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::Json(_) => "json",
            DecodeError::UnknownModel(_) => "unknown_model",
            DecodeError::Time { .. } => "time",
        }
    }
}

/// Fields common to every record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordHeader {
    #[serde(default)]
    pub model: String,
    #[serde(rename = "time", default)]
    pub time_str: String,
    #[serde(skip)]
    pub time: Option<NaiveDateTime>,
}

/// One decoded transmission.
pub trait Reading: Send + Sync + fmt::Debug {
    fn header(&self) -> &RecordHeader;
    fn header_mut(&mut self) -> &mut RecordHeader;

    /// InfluxDB measurement the points of this device are written to.
    fn measurement(&self) -> &'static str;

    /// Device specific tags. `model` is added by [`Reading::to_point`].
    fn tags(&self) -> BTreeMap<String, String>;

    fn fields(&self) -> BTreeMap<String, FieldValue>;

    fn model(&self) -> &str {
        &self.header().model
    }

    fn time_str(&self) -> &str {
        &self.header().time_str
    }

    fn set_time(&mut self, time: NaiveDateTime) {
        self.header_mut().time = Some(time);
    }

    /// Build the point for this reading, enriched by the metadata field sets
    /// configured for its model.
    fn to_point(
        &self,
        field_sets: Option<&BTreeMap<String, MetadataFieldSet>>,
    ) -> Result<Point, DecodeError> {
        let time = match self.header().time {
            Some(time) => time,
            None => parse_time(self.time_str())?,
        };

        let mut tags = self.tags();
        tags.insert("model".to_string(), self.model().to_string());
        if let Some(sets) = field_sets {
            apply_field_sets(&mut tags, sets);
        }

        Ok(Point {
            measurement: self.measurement().to_string(),
            tags,
            fields: self.fields(),
            timestamp: time.and_utc().timestamp(),
        })
    }
}

/// A device schema that can be registered with the [`Decoder`].
pub trait DeviceSchema: Reading + DeserializeOwned + 'static {
    /// Value of the `model` key rtl_433 writes for this device.
    const MODEL: &'static str;
}

pub type DecodeFn = fn(&[u8]) -> Result<Box<dyn Reading>, serde_json::Error>;

fn decode_as<T: DeviceSchema>(raw: &[u8]) -> Result<Box<dyn Reading>, serde_json::Error> {
    Ok(Box::new(serde_json::from_slice::<T>(raw)?))
}

#[derive(Deserialize)]
struct ModelEnvelope {
    #[serde(default)]
    model: String,
}

/// Name-keyed registry of device schemas.
#[derive(Clone)]
pub struct Decoder {
    schemas: HashMap<&'static str, DecodeFn>,
}

impl Decoder {
    pub fn empty() -> Self {
        Self {
            schemas: HashMap::new(),
        }
    }

    pub fn with_builtin_devices() -> Self {
        let mut decoder = Self::empty();
        decoder.register::<AmbientWeather>();
        decoder.register::<AcuRiteTowerSensor>();
        decoder.register::<AcuRite5n1Sensor>();
        decoder.register::<AcuRiteRainGauge>();
        decoder.register::<AcuRiteLightning6045M>();
        decoder.register::<AcuRite986Sensor>();
        decoder.register::<AcuRite606TXSensor>();
        decoder.register::<AcuRite609TXCSensor>();
        decoder.register::<Bresser3CHSensor>();
        decoder.register::<CalibeurRF104>();
        decoder.register::<CurrentCostTX>();
        decoder.register::<DanfossCFRThermostat>();
        decoder.register::<EfergyE2CT>();
        decoder.register::<EfergyOptical>();
        decoder.register::<Akhan100F14>();
        decoder
    }

    pub fn register<T: DeviceSchema>(&mut self) {
        self.schemas.insert(T::MODEL, decode_as::<T>);
    }

    pub fn models(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.schemas.keys().copied()
    }

    /// Decode one line into a typed reading with its time parsed.
    pub fn decode(&self, raw: &[u8]) -> Result<Box<dyn Reading>, DecodeError> {
        let envelope: ModelEnvelope = serde_json::from_slice(raw)?;
        let decode = self
            .schemas
            .get(envelope.model.as_str())
            .ok_or(DecodeError::UnknownModel(envelope.model))?;

        let mut reading = decode(raw)?;
        let time = parse_time(reading.time_str())?;
        reading.set_time(time);
        Ok(reading)
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::with_builtin_devices()
    }
}

impl fmt::Debug for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut models: Vec<_> = self.schemas.keys().collect();
        models.sort();
        f.debug_struct("Decoder").field("models", &models).finish()
    }
}

fn tag_map<const N: usize>(pairs: [(&str, String); N]) -> BTreeMap<String, String> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

fn field_map<const N: usize>(pairs: [(&str, FieldValue); N]) -> BTreeMap<String, FieldValue> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

pub fn parse_time(value: &str) -> Result<NaiveDateTime, DecodeError> {
    NaiveDateTime::parse_from_str(value, TIME_FORMAT).map_err(|source| DecodeError::Time {
        value: value.to_string(),
        source,
    })
}

/// Inject the tags of every set whose predicates hold. Sets are applied in
/// name order and later sets see tags added by earlier ones.
pub fn apply_field_sets(
    tags: &mut BTreeMap<String, String>,
    field_sets: &BTreeMap<String, MetadataFieldSet>,
) {
    for (name, set) in field_sets {
        if set.matches(tags) {
            tracing::trace!(set = %name, "metadata field set applies");
            tags.extend(set.tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }
}
