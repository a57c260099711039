//! Plaintext protocol messages.
//!
//! Two message kinds travel through a channel, tagged by `type`:
//! - `status`: published by the device, describes what it is doing
//! - `command`: published by a client, asks the device to change schedule or override
//!
//! Field names follow the deployed devices (`temp`, `program`, `msgexp_s`, ...).
//! The descriptive names are accepted as aliases on input.

use chrono::{DateTime, Duration, SecondsFormat, Timelike, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::{CommandId, SyncError};

/// Minutes in a day; interval bounds are minutes since midnight UTC.
pub const MINUTES_PER_DAY: i32 = 1440;

/// Bound value marking an unbounded ("forever") interval.
const FOREVER: i32 = -1;

/// A protocol message after decryption and shape validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    /// Device status report.
    Status(StatusMessage),
    /// Client command.
    Command(CommandMessage),
}

impl Message {
    /// Timestamp declared by the sender.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Message::Status(s) => s.timestamp,
            Message::Command(c) => c.timestamp,
        }
    }

    /// The status payload, if this is a status message.
    pub fn as_status(&self) -> Option<&StatusMessage> {
        match self {
            Message::Status(s) => Some(s),
            Message::Command(_) => None,
        }
    }

    /// The command payload, if this is a command message.
    pub fn as_command(&self) -> Option<&CommandMessage> {
        match self {
            Message::Command(c) => Some(c),
            Message::Status(_) => None,
        }
    }
}

/// Status published by the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    /// When the device produced this status.
    #[serde(serialize_with = "iso_millis")]
    pub timestamp: DateTime<Utc>,

    /// Whether heating is logically on.
    #[serde(deserialize_with = "flag")]
    pub status: bool,

    /// Whether the burner is actually running (only sent while on).
    #[serde(
        default,
        deserialize_with = "lenient_flag",
        skip_serializing_if = "Option::is_none"
    )]
    pub actual_status: Option<bool>,

    /// Measured temperature.
    #[serde(rename = "temp", alias = "temperature", default, deserialize_with = "opt_number")]
    pub temperature: Option<f64>,

    /// Temperature the device is heating towards.
    #[serde(
        rename = "target_temp",
        alias = "target_temperature",
        default,
        deserialize_with = "opt_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_temperature: Option<f64>,

    /// Human readable device name.
    pub name: String,

    /// Weekly-agnostic daily schedule.
    #[serde(rename = "program", alias = "schedule")]
    pub schedule: Vec<Interval>,

    /// Active override, if any.
    #[serde(default, alias = "override")]
    pub override_program: Option<Override>,

    /// Message expiry the device wants clients to use.
    #[serde(
        rename = "msgexp_s",
        alias = "expiry_s",
        default,
        deserialize_with = "lenient_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub expiry_s: Option<u64>,

    /// Status publish period of the device.
    #[serde(
        rename = "msgupd_s",
        alias = "update_interval_s",
        default,
        deserialize_with = "lenient_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub update_interval_s: Option<u64>,

    /// Id of the last command the device applied.
    #[serde(rename = "lastcmd_id", alias = "last_command_id", default)]
    pub last_command_id: Option<CommandId>,
}

/// Command published by a client.
///
/// `program` and `override_program` are always present on the wire, `null`
/// meaning "no schedule" / "no override".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    /// When the command was issued.
    #[serde(serialize_with = "iso_millis")]
    pub timestamp: DateTime<Utc>,

    /// Command id, echoed back by the device as `lastcmd_id`.
    pub id: CommandId,

    /// Replacement schedule.
    #[serde(rename = "program", alias = "schedule", default)]
    pub schedule: Option<Vec<Interval>>,

    /// Replacement override.
    #[serde(default, alias = "override")]
    pub override_program: Option<Override>,

    /// Legacy one-word command.
    #[serde(
        rename = "command",
        alias = "legacy_command",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub legacy_command: Option<LegacyCommand>,
}

/// Commands understood by cleartext-era devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegacyCommand {
    /// Switch heating on.
    TurnOn,
    /// Switch heating off.
    TurnOff,
    /// Ask for a status report.
    Status,
}

/// A span of the day in minutes since midnight UTC.
///
/// `{begin: -1, end: -1}` means forever. Zero-length intervals cover nothing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    /// First minute covered.
    pub begin: i32,
    /// First minute no longer covered.
    pub end: i32,
    /// Temperature to hold during the interval.
    #[serde(
        rename = "temp",
        alias = "temperature",
        default,
        deserialize_with = "opt_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub temperature: Option<f64>,
}

impl Interval {
    /// An interval spanning all time.
    pub fn forever() -> Self {
        Self {
            begin: FOREVER,
            end: FOREVER,
            temperature: None,
        }
    }

    /// The interval from `start` lasting `duration`, truncated to minutes.
    ///
    /// Bounds are minutes of the day, so the span must be shorter than a day
    /// and must not collapse to an empty interval.
    pub fn from_span(start: DateTime<Utc>, duration: Duration) -> Result<Self, SyncError> {
        if duration <= Duration::zero() || duration >= Duration::days(1) {
            return Err(SyncError::InvalidData(format!(
                "span must be between 0 and 24 hours, got {} s",
                duration.num_seconds()
            )));
        }
        let end = start
            .checked_add_signed(duration)
            .ok_or_else(|| SyncError::InvalidData("span end out of range".into()))?;
        let span = Self {
            begin: minute_of_day(start),
            end: minute_of_day(end),
            temperature: None,
        };
        if span.begin == span.end {
            return Err(SyncError::InvalidData(
                "span is shorter than a minute".into(),
            ));
        }
        Ok(span)
    }

    /// Attach a temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// True for the forever sentinel (either bound negative).
    pub fn is_forever(&self) -> bool {
        self.begin < 0 || self.end < 0
    }

    /// Whether `minute` (since midnight UTC) falls inside this interval.
    ///
    /// Intervals with `begin > end` wrap past midnight.
    pub fn covers(&self, minute: i32) -> bool {
        if self.is_forever() {
            return true;
        }
        let minute = minute.rem_euclid(MINUTES_PER_DAY);
        match self.begin.cmp(&self.end) {
            std::cmp::Ordering::Equal => false,
            std::cmp::Ordering::Less => self.begin <= minute && minute < self.end,
            std::cmp::Ordering::Greater => minute >= self.begin || minute < self.end,
        }
    }
}

/// A schedule override: holds `status` during `[begin, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Override {
    /// Heating on or off while the override holds.
    #[serde(deserialize_with = "flag")]
    pub status: bool,
    /// First minute covered, or -1.
    pub begin: i32,
    /// First minute no longer covered, or -1.
    pub end: i32,
    /// Temperature to hold.
    #[serde(
        rename = "temp",
        alias = "temperature",
        default,
        deserialize_with = "opt_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub temperature: Option<f64>,
}

impl Override {
    /// An override that holds until cancelled.
    pub fn permanent(status: bool) -> Self {
        Self {
            status,
            begin: FOREVER,
            end: FOREVER,
            temperature: None,
        }
    }

    /// An override from `start` lasting `duration`.
    pub fn timed(
        status: bool,
        start: DateTime<Utc>,
        duration: Duration,
        temperature: Option<f64>,
    ) -> Result<Self, SyncError> {
        let span = Interval::from_span(start, duration)?;
        Ok(Self {
            status,
            begin: span.begin,
            end: span.end,
            temperature,
        })
    }

    /// True if the override has no time bounds.
    pub fn is_permanent(&self) -> bool {
        self.begin < 0 || self.end < 0
    }

    /// The time span of this override.
    pub fn interval(&self) -> Interval {
        Interval {
            begin: self.begin,
            end: self.end,
            temperature: self.temperature,
        }
    }
}

/// A decrypted JSON object whose shape has not been checked yet.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawMessage(Map<String, Value>);

impl RawMessage {
    /// Wrap a JSON object.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Wrap a JSON value, if it is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self(fields)),
            _ => None,
        }
    }

    /// Look up a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set `key` to `value` unless the field already has a non-null value.
    pub fn insert_default(&mut self, key: &str, value: Value) {
        match self.0.get(key) {
            Some(v) if !v.is_null() => {}
            _ => {
                self.0.insert(key.to_string(), value);
            }
        }
    }

    /// The declared `timestamp`, if present and parseable.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.0
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<DateTime<Utc>>().ok())
    }

    /// Check the shape and produce a typed message.
    pub fn into_message(self) -> Result<Message, serde_json::Error> {
        serde_json::from_value(Value::Object(self.0))
    }

    /// The underlying JSON object.
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

fn minute_of_day(t: DateTime<Utc>) -> i32 {
    (t.hour() * 60 + t.minute()) as i32
}

/// Timestamps in the same form as JavaScript's `toISOString`.
fn iso_millis<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn parse_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "on" | "true" => Some(true),
            "off" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// A boolean, or the legacy `"on"`/`"off"` strings.
fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    let value = Value::deserialize(d)?;
    parse_flag(&value).ok_or_else(|| D::Error::custom(format!("expected a boolean flag, got {value}")))
}

fn lenient_flag<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(parse_flag(&value))
}

/// A number or numeric string. `null` is absent; anything else is an error.
fn opt_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    let value = Value::deserialize(d)?;
    let number = match &value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match number {
        Some(n) if n.is_finite() => Ok(Some(n)),
        _ => Err(D::Error::custom(format!("expected a number, got {value}"))),
    }
}

/// Whole seconds; unusable values are treated as absent.
fn lenient_secs<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.is_finite()).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    })
}
