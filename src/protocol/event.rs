//! Wyoming event framing
//!
//! Every event starts with a single JSON header line. The header may carry
//! the event data inline and declares the lengths of an optional JSON data
//! block and an optional binary payload that follow it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version written into every outgoing header
pub const PROTOCOL_VERSION: &str = "1.5.2";

/// Upper bound for a single header line, newline included
const MAX_HEADER_LEN: usize = 1024 * 1024;

/// A decoded protocol event
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    event_type: String,
    data: Map<String, Value>,
    payload: Option<Vec<u8>>,
}

impl Event {
    /// Create an event with no data and no payload
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data: Map::new(),
            payload: None,
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// Split the event into its type, data and payload
    pub fn into_parts(self) -> (String, Map<String, Value>, Option<Vec<u8>>) {
        (self.event_type, self.data, self.payload)
    }
}

/// Header line as it appears on the wire
#[derive(Debug, Serialize, Deserialize)]
struct Header {
    #[serde(rename = "type")]
    event_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_length: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload_length: Option<usize>,
}

/// Errors raised while reading or writing events
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid event json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("event header exceeds {} bytes", MAX_HEADER_LEN)]
    HeaderTooLong,

    #[error("connection closed in the middle of an event header")]
    TruncatedHeader,

    #[error("event data block of {0} bytes exceeds {} bytes", MAX_HEADER_LEN)]
    DataTooLong(usize),
}

/// Read the next event.
///
/// Returns `Ok(None)` when the peer closed the connection cleanly between
/// events.
pub async fn read_event<R>(reader: &mut R) -> Result<Option<Event>, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let read = (&mut *reader)
        .take(MAX_HEADER_LEN as u64)
        .read_until(b'\n', &mut line)
        .await?;

    if read == 0 {
        return Ok(None);
    }

    if line.last() != Some(&b'\n') {
        if line.len() >= MAX_HEADER_LEN {
            return Err(CodecError::HeaderTooLong);
        }
        return Err(CodecError::TruncatedHeader);
    }

    let header: Header = serde_json::from_slice(&line)?;
    let mut data = header.data.unwrap_or_default();

    if let Some(len) = header.data_length {
        if len > MAX_HEADER_LEN {
            return Err(CodecError::DataTooLong(len));
        }
        let buf = read_declared(reader, len).await?;
        let extra: Map<String, Value> = serde_json::from_slice(&buf)?;
        data.extend(extra);
    }

    let payload = match header.payload_length {
        Some(len) => Some(read_declared(reader, len).await?),
        None => None,
    };

    Ok(Some(Event {
        event_type: header.event_type,
        data,
        payload,
    }))
}

/// Read exactly `len` bytes. The buffer grows with the bytes that arrive, not
/// with the length the peer declared.
async fn read_declared<R>(reader: &mut R, len: usize) -> Result<Vec<u8>, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    (&mut *reader).take(len as u64).read_to_end(&mut buf).await?;
    if buf.len() < len {
        return Err(CodecError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("expected {len} bytes, connection closed after {}", buf.len()),
        )));
    }
    Ok(buf)
}

/// Write an event and flush it
pub async fn write_event<W>(writer: &mut W, event: &Event) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let data_bytes = if event.data.is_empty() {
        None
    } else {
        Some(serde_json::to_vec(&event.data)?)
    };

    let header = Header {
        event_type: event.event_type.clone(),
        version: Some(PROTOCOL_VERSION.to_string()),
        data: None,
        data_length: data_bytes.as_ref().map(Vec::len),
        payload_length: event.payload.as_ref().map(Vec::len),
    };

    let mut header_bytes = serde_json::to_vec(&header)?;
    header_bytes.push(b'\n');

    writer.write_all(&header_bytes).await?;
    if let Some(data) = &data_bytes {
        writer.write_all(data).await?;
    }
    if let Some(payload) = &event.payload {
        writer.write_all(payload).await?;
    }
    writer.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_read_event_with_data_block_and_payload() {
        let header = br#"{"type":"audio-chunk","data_length":39,"payload_length":4}"#;
        let data = br#"{"rate":16000,"width":2,"channels":1}  "#;
        let mock = Builder::new()
            .read(header)
            .read(b"\n")
            .read(data)
            .read(&[1, 2, 3, 4])
            .build();
        let mut reader = BufReader::new(mock);

        let event = read_event(&mut reader).await.unwrap().unwrap();
        assert_eq!(event.event_type(), "audio-chunk");
        assert_eq!(event.data()["rate"], 16000);
        assert_eq!(event.data()["channels"], 1);
        assert_eq!(event.payload(), Some(&[1u8, 2, 3, 4][..]));
    }

    #[tokio::test]
    async fn test_read_event_merges_inline_and_separate_data() {
        let input = concat!(
            r#"{"type":"transcribe","data":{"language":"ru","name":"x"},"data_length":13}"#,
            "\n",
            r#"{"name":"y"} "#,
        );
        let mut reader = BufReader::new(input.as_bytes());

        let event = read_event(&mut reader).await.unwrap().unwrap();
        assert_eq!(event.data()["language"], "ru");
        assert_eq!(event.data()["name"], "y");
        assert!(event.payload().is_none());
    }

    #[tokio::test]
    async fn test_read_consecutive_events_then_eof() {
        let input = "{\"type\":\"describe\"}\n{\"type\":\"audio-stop\"}\n";
        let mut reader = BufReader::new(input.as_bytes());

        let first = read_event(&mut reader).await.unwrap().unwrap();
        let second = read_event(&mut reader).await.unwrap().unwrap();
        assert_eq!(first.event_type(), "describe");
        assert_eq!(second.event_type(), "audio-stop");
        assert!(read_event(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_header_is_an_error() {
        let mut reader = BufReader::new(&b"{\"type\":\"desc"[..]);
        let result = read_event(&mut reader).await;
        assert!(matches!(result, Err(CodecError::TruncatedHeader)));
    }

    #[tokio::test]
    async fn test_oversized_header_is_rejected() {
        let line = vec![b' '; MAX_HEADER_LEN + 10];
        let mut reader = BufReader::new(&line[..]);
        let result = read_event(&mut reader).await;
        assert!(matches!(result, Err(CodecError::HeaderTooLong)));
    }

    #[tokio::test]
    async fn test_short_payload_is_an_io_error() {
        let input = b"{\"type\":\"audio-chunk\",\"payload_length\":8}\n\x01\x02";
        let mut reader = BufReader::new(&input[..]);
        let result = read_event(&mut reader).await;
        assert!(matches!(result, Err(CodecError::Io(_))));
    }

    #[tokio::test]
    async fn test_huge_declared_payload_is_not_preallocated() {
        let input = b"{\"type\":\"audio-chunk\",\"payload_length\":1125899906842624}\n\x01\x02";
        let mut reader = BufReader::new(&input[..]);
        let result = read_event(&mut reader).await;
        assert!(matches!(
            result,
            Err(CodecError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof
        ));
    }

    #[tokio::test]
    async fn test_oversized_data_block_is_rejected() {
        let input = format!(
            "{{\"type\":\"transcribe\",\"data_length\":{}}}\n{{}}",
            MAX_HEADER_LEN + 1
        );
        let mut reader = BufReader::new(input.as_bytes());
        let result = read_event(&mut reader).await;
        assert!(matches!(result, Err(CodecError::DataTooLong(len)) if len == MAX_HEADER_LEN + 1));
    }

    #[tokio::test]
    async fn test_write_event_declares_lengths() {
        let mut data = Map::new();
        data.insert("text".into(), Value::String("привет".into()));
        let event = Event::new("transcript").with_data(data).with_payload(vec![9, 9]);

        let mut out = Vec::new();
        write_event(&mut out, &event).await.unwrap();

        let newline = out.iter().position(|b| *b == b'\n').unwrap();
        let header: Value = serde_json::from_slice(&out[..newline]).unwrap();
        assert_eq!(header["type"], "transcript");
        assert_eq!(header["version"], PROTOCOL_VERSION);
        assert!(header.get("data").is_none());

        let data_len = header["data_length"].as_u64().unwrap() as usize;
        let body = &out[newline + 1..];
        let data: Value = serde_json::from_slice(&body[..data_len]).unwrap();
        assert_eq!(data["text"], "привет");
        assert_eq!(header["payload_length"], 2);
        assert_eq!(&body[data_len..], &[9, 9]);
    }

    #[tokio::test]
    async fn test_write_event_without_data_omits_lengths() {
        let mock = Builder::new()
            .write(format!("{{\"type\":\"describe\",\"version\":\"{PROTOCOL_VERSION}\"}}\n").as_bytes())
            .build();
        let mut writer = mock;
        write_event(&mut writer, &Event::new("describe")).await.unwrap();
    }
}
