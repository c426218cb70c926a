//! Metric points and their InfluxDB line-protocol encoding.

use std::collections::BTreeMap;
use std::fmt::{self, Write};

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Int(i64),
    Str(String),
    Bool(bool),
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Str(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_string())
    }
}

/// Timestamp precision of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    Nanoseconds,
    Milliseconds,
    #[default]
    Seconds,
}

impl Precision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Nanoseconds => "ns",
            Precision::Milliseconds => "ms",
            Precision::Seconds => "s",
        }
    }
}

/// A single measurement ready to be written to the sink.
///
/// The timestamp is always kept in unix seconds and scaled on encode.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: i64,
}

impl Point {
    pub fn new(measurement: impl Into<String>, timestamp: i64) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Encode as one line of InfluxDB line protocol, without a trailing
    /// newline. Tags with empty values are dropped since InfluxDB rejects them.
    pub fn to_line_protocol(&self, precision: Precision) -> String {
        let mut line = String::with_capacity(64);
        escape_into(&mut line, &self.measurement, &[',', ' ']);

        for (key, value) in &self.tags {
            if value.is_empty() {
                continue;
            }
            line.push(',');
            escape_into(&mut line, key, &[',', '=', ' ']);
            line.push('=');
            escape_into(&mut line, value, &[',', '=', ' ']);
        }

        let mut first = true;
        for (key, value) in &self.fields {
            line.push(if first { ' ' } else { ',' });
            first = false;
            escape_into(&mut line, key, &[',', '=', ' ']);
            line.push('=');
            // Writing into a String cannot fail.
            let _ = write!(line, "{value}");
        }

        let timestamp = match precision {
            Precision::Seconds => self.timestamp,
            Precision::Milliseconds => self.timestamp.saturating_mul(1_000),
            Precision::Nanoseconds => self.timestamp.saturating_mul(1_000_000_000),
        };
        let _ = write!(line, " {timestamp}");
        line
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Int(v) => write!(f, "{v}i"),
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::Str(v) => {
                f.write_char('"')?;
                for ch in v.chars() {
                    if ch == '"' || ch == '\\' {
                        f.write_char('\\')?;
                    }
                    f.write_char(ch)?;
                }
                f.write_char('"')
            }
        }
    }
}

fn escape_into(out: &mut String, raw: &str, special: &[char]) {
    for ch in raw.chars() {
        if special.contains(&ch) || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
}

/// Join a batch into a single request body.
pub fn encode_batch(points: &[Point], precision: Precision) -> String {
    let mut body = String::new();
    for point in points {
        body.push_str(&point.to_line_protocol(precision));
        body.push('\n');
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_tags_fields_and_timestamp() {
        let point = Point::new("AcuRiteTowerSensor", 1_500_000_000)
            .tag("channel", "A")
            .tag("id", "1234")
            .field("temperature_C", 21.5)
            .field("humidity", 40i64)
            .field("battery_low", false);

        assert_eq!(
            point.to_line_protocol(Precision::Seconds),
            "AcuRiteTowerSensor,channel=A,id=1234 battery_low=false,humidity=40i,temperature_C=21.5 1500000000"
        );
    }

    #[test]
    fn escapes_special_characters() {
        let point = Point::new("weather station", 1)
            .tag("room", "living room,east")
            .field("note", "say \"hi\" \\o/");

        assert_eq!(
            point.to_line_protocol(Precision::Seconds),
            r#"weather\ station,room=living\ room\,east note="say \"hi\" \\o/" 1"#
        );
    }

    #[test]
    fn empty_tag_values_are_dropped() {
        let point = Point::new("m", 2).tag("empty", "").field("v", 1.0);
        assert_eq!(point.to_line_protocol(Precision::Seconds), "m v=1 2");
    }

    #[test]
    fn precision_scales_timestamp() {
        let point = Point::new("m", 3).field("v", 1i64);
        assert_eq!(point.to_line_protocol(Precision::Milliseconds), "m v=1i 3000");
        assert_eq!(
            point.to_line_protocol(Precision::Nanoseconds),
            "m v=1i 3000000000"
        );
    }

    #[test]
    fn batch_is_newline_terminated() {
        let points = vec![
            Point::new("a", 1).field("v", 1i64),
            Point::new("b", 2).field("v", 2i64),
        ];
        assert_eq!(encode_batch(&points, Precision::Seconds), "a v=1i 1\nb v=2i 2\n");
    }
}
