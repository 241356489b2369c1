//! Typed view over the event types this server understands

use serde::de::DeserializeOwned;
use serde::ser::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::info::Info;

use super::event::Event;

pub const AUDIO_START: &str = "audio-start";
pub const AUDIO_CHUNK: &str = "audio-chunk";
pub const AUDIO_STOP: &str = "audio-stop";
pub const TRANSCRIBE: &str = "transcribe";
pub const TRANSCRIPT: &str = "transcript";
pub const DESCRIBE: &str = "describe";
pub const INFO: &str = "info";

/// Raw PCM format announced alongside audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub rate: u32,
    /// Bytes per sample
    pub width: u16,
    /// Number of interleaved channels
    pub channels: u16,
}

impl AudioFormat {
    /// 16 kHz, 16-bit, mono: the only layout the model accepts
    pub const EXPECTED: AudioFormat = AudioFormat {
        rate: 16_000,
        width: 2,
        channels: 1,
    };
}

/// Optional hints a client may send before streaming audio
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscribeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct TranscriptData {
    text: String,
}

/// Known protocol messages, plus a catch-all for everything else
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    AudioStart(AudioFormat),
    AudioChunk { format: AudioFormat, audio: Vec<u8> },
    AudioStop,
    Transcribe(TranscribeRequest),
    Transcript { text: String },
    Describe,
    Info(Info),
    Unknown(String),
}

/// A known event type whose data did not match its schema
#[derive(Debug, thiserror::Error)]
#[error("malformed {event_type} event: {source}")]
pub struct MessageError {
    pub event_type: String,
    #[source]
    pub source: serde_json::Error,
}

impl Message {
    pub fn event_type(&self) -> &str {
        match self {
            Message::AudioStart(_) => AUDIO_START,
            Message::AudioChunk { .. } => AUDIO_CHUNK,
            Message::AudioStop => AUDIO_STOP,
            Message::Transcribe(_) => TRANSCRIBE,
            Message::Transcript { .. } => TRANSCRIPT,
            Message::Describe => DESCRIBE,
            Message::Info(_) => INFO,
            Message::Unknown(event_type) => event_type,
        }
    }

    /// Encode the message as an event
    pub fn into_event(self) -> Result<Event, serde_json::Error> {
        let event = match self {
            Message::AudioStart(format) => Event::new(AUDIO_START).with_data(to_data(&format)?),
            Message::AudioChunk { format, audio } => Event::new(AUDIO_CHUNK)
                .with_data(to_data(&format)?)
                .with_payload(audio),
            Message::AudioStop => Event::new(AUDIO_STOP),
            Message::Transcribe(request) => Event::new(TRANSCRIBE).with_data(to_data(&request)?),
            Message::Transcript { text } => transcript_event(text),
            Message::Describe => Event::new(DESCRIBE),
            Message::Info(info) => Event::new(INFO).with_data(to_data(&info)?),
            Message::Unknown(event_type) => Event::new(event_type),
        };
        Ok(event)
    }
}

impl TryFrom<Event> for Message {
    type Error = MessageError;

    fn try_from(event: Event) -> Result<Self, Self::Error> {
        let (event_type, data, payload) = event.into_parts();

        let message = match event_type.as_str() {
            AUDIO_START => Message::AudioStart(from_data(&event_type, data)?),
            AUDIO_CHUNK => Message::AudioChunk {
                format: from_data(&event_type, data)?,
                audio: payload.unwrap_or_default(),
            },
            AUDIO_STOP => Message::AudioStop,
            TRANSCRIBE => Message::Transcribe(from_data(&event_type, data)?),
            TRANSCRIPT => {
                let TranscriptData { text } = from_data(&event_type, data)?;
                Message::Transcript { text }
            }
            DESCRIBE => Message::Describe,
            INFO => Message::Info(from_data(&event_type, data)?),
            _ => Message::Unknown(event_type.clone()),
        };
        Ok(message)
    }
}

/// Build a `transcript` event carrying `text`
pub fn transcript_event(text: impl Into<String>) -> Event {
    let mut data = Map::new();
    data.insert("text".to_string(), Value::String(text.into()));
    Event::new(TRANSCRIPT).with_data(data)
}

fn to_data<T: Serialize>(value: &T) -> Result<Map<String, Value>, serde_json::Error> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(serde_json::Error::custom(format!(
            "event data must be a json object, got {other}"
        ))),
    }
}

fn from_data<T: DeserializeOwned>(
    event_type: &str,
    data: Map<String, Value>,
) -> Result<T, MessageError> {
    serde_json::from_value(Value::Object(data)).map_err(|source| MessageError {
        event_type: event_type.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event_with(event_type: &str, data: Value) -> Event {
        let Value::Object(map) = data else {
            panic!("test data must be an object");
        };
        Event::new(event_type).with_data(map)
    }

    #[test]
    fn test_audio_chunk_takes_payload() {
        let event = event_with(AUDIO_CHUNK, json!({"rate": 16000, "width": 2, "channels": 1}))
            .with_payload(vec![1, 0, 2, 0]);

        let message = Message::try_from(event).unwrap();
        assert_eq!(
            message,
            Message::AudioChunk {
                format: AudioFormat::EXPECTED,
                audio: vec![1, 0, 2, 0],
            }
        );
    }

    #[test]
    fn test_audio_chunk_with_extra_fields() {
        let event = event_with(
            AUDIO_CHUNK,
            json!({"rate": 22050, "width": 2, "channels": 2, "timestamp": 120}),
        );

        let Message::AudioChunk { format, audio } = Message::try_from(event).unwrap() else {
            panic!("expected an audio chunk");
        };
        assert_eq!(format.rate, 22050);
        assert_eq!(format.channels, 2);
        assert!(audio.is_empty());
    }

    #[test]
    fn test_audio_chunk_missing_rate_is_malformed() {
        let event = event_with(AUDIO_CHUNK, json!({"width": 2, "channels": 1}));
        let err = Message::try_from(event).unwrap_err();
        assert_eq!(err.event_type, AUDIO_CHUNK);
        assert!(err.to_string().contains("rate"));
    }

    #[test]
    fn test_transcribe_hints_are_optional() {
        let bare = Message::try_from(Event::new(TRANSCRIBE)).unwrap();
        assert_eq!(bare, Message::Transcribe(TranscribeRequest::default()));

        let hinted = event_with(TRANSCRIBE, json!({"language": "ru", "context": {"room": "kitchen"}}));
        let Message::Transcribe(request) = Message::try_from(hinted).unwrap() else {
            panic!("expected transcribe");
        };
        assert_eq!(request.language.as_deref(), Some("ru"));
        assert_eq!(request.context.unwrap()["room"], "kitchen");
    }

    #[test]
    fn test_unknown_event_type_is_kept() {
        let message = Message::try_from(Event::new("ping")).unwrap();
        assert_eq!(message, Message::Unknown("ping".to_string()));
        assert_eq!(message.event_type(), "ping");
    }

    #[test]
    fn test_transcript_event_carries_text() {
        let event = transcript_event("добрый день");
        assert_eq!(event.event_type(), TRANSCRIPT);
        assert_eq!(event.data()["text"], "добрый день");

        let message = Message::try_from(event).unwrap();
        assert_eq!(message, Message::Transcript { text: "добрый день".to_string() });
    }

    #[test]
    fn test_audio_stop_encodes_without_data() {
        let event = Message::AudioStop.into_event().unwrap();
        assert_eq!(event.event_type(), AUDIO_STOP);
        assert!(event.data().is_empty());
        assert!(event.payload().is_none());
    }
}
