use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{de::Visitor, Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// The kind of vision processing requested for an event.
///
/// Kinds this build does not know about are kept as `Unknown` instead of failing to
/// parse: the consumer records them as a failed event rather than dropping the batch.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum EventKind {
    ObjectDetection,
    FaceRecognition,
    TextExtraction,
    Unknown(String),
}

impl EventKind {
    /// All kinds a strategy can be registered for.
    pub const KNOWN: [EventKind; 3] = [
        EventKind::ObjectDetection,
        EventKind::FaceRecognition,
        EventKind::TextExtraction,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::ObjectDetection => "object_detection",
            EventKind::FaceRecognition => "face_recognition",
            EventKind::TextExtraction => "text_extraction",
            EventKind::Unknown(tag) => tag,
        }
    }

    /// Prefix of the cache key holding results for this kind, `None` for unknown kinds.
    pub fn cache_namespace(&self) -> Option<&'static str> {
        match self {
            EventKind::ObjectDetection => Some("vision:objects"),
            EventKind::FaceRecognition => Some("vision:faces"),
            EventKind::TextExtraction => Some("vision:text"),
            EventKind::Unknown(_) => None,
        }
    }
}

/// Allow casting `EventKind` from strings. Never fails, unrecognized tags become `Unknown`.
impl FromStr for EventKind {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "object_detection" => Ok(EventKind::ObjectDetection),
            "face_recognition" => Ok(EventKind::FaceRecognition),
            "text_extraction" => Ok(EventKind::TextExtraction),
            other => Ok(EventKind::Unknown(other.to_owned())),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

struct EventKindVisitor;

impl<'de> Visitor<'de> for EventKindVisitor {
    type Value = EventKind;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "the string representation of EventKind")
    }

    fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        match EventKind::from_str(s) {
            Ok(kind) => Ok(kind),
            Err(never) => match never {},
        }
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(EventKindVisitor)
    }
}

impl Serialize for EventKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// An image waiting in the queue to be processed.
///
/// Queue entries are JSON, with the payload carried as standard base64 under `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingEvent {
    #[serde(default = "Uuid::now_v7")]
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(
        rename = "data",
        serialize_with = "serialize_payload",
        deserialize_with = "deserialize_payload"
    )]
    pub payload: Vec<u8>,
    #[serde(rename = "timestamp", with = "chrono::serde::ts_milliseconds")]
    pub enqueued_at: DateTime<Utc>,
}

impl ProcessingEvent {
    pub fn new(kind: EventKind, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            payload,
            // Queue entries carry millisecond timestamps.
            enqueued_at: Utc::now().trunc_subsecs(3),
        }
    }
}

pub fn serialize_payload<S>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&STANDARD.encode(payload))
}

pub fn deserialize_payload<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let encoded = String::deserialize(deserializer)?;
    STANDARD
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)
}
