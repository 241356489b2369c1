//! Per-connection session state machine
//!
//! A session is either idle (no audio buffered) or receiving an utterance.
//! The first `audio-chunk` opens the utterance, `audio-stop` closes it,
//! triggers one transcription and ends the exchange.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::model::{InferenceError, InferenceGate};
use crate::protocol::{transcript_event, AudioFormat, Event, Message, MessageError, AUDIO_CHUNK};

/// Client broke the event ordering contract
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("audio-stop received without any preceding audio-chunk")]
    AudioStopWithoutAudio,

    /// Audio whose format could not be read; its payload cannot be kept
    #[error(transparent)]
    MalformedAudio(MessageError),
}

/// Errors that end a session
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("transcription failed: {0}")]
    Inference(#[from] InferenceError),
}

/// Outcome of handling one event
#[derive(Debug)]
pub struct Handled {
    /// Event to send back to the client, if any
    pub reply: Option<Event>,
    /// Whether to keep reading events from this connection
    pub continue_session: bool,
}

impl Handled {
    fn proceed() -> Self {
        Self {
            reply: None,
            continue_session: true,
        }
    }

    fn respond(reply: Event) -> Self {
        Self {
            reply: Some(reply),
            continue_session: true,
        }
    }

    fn finish(reply: Event) -> Self {
        Self {
            reply: Some(reply),
            continue_session: false,
        }
    }
}

/// Server-side state for one connection
pub struct Session {
    /// Audio of the utterance in progress; `None` when idle
    audio: Option<Vec<u8>>,
    gate: InferenceGate,
    info: Arc<Event>,
    warned_format: bool,
}

impl Session {
    pub fn new(gate: InferenceGate, info: Arc<Event>) -> Self {
        Self {
            audio: None,
            gate,
            info,
            warned_format: false,
        }
    }

    /// Whether an utterance is in progress
    pub fn is_receiving_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Bytes buffered for the utterance in progress
    pub fn buffered_len(&self) -> usize {
        self.audio.as_ref().map_or(0, Vec::len)
    }

    /// Handle one event from the client
    pub async fn handle(&mut self, event: Event) -> Result<Handled, SessionError> {
        let message = match Message::try_from(event) {
            Ok(message) => message,
            Err(e) if e.event_type == AUDIO_CHUNK => {
                return Err(ProtocolError::MalformedAudio(e).into());
            }
            Err(e) => {
                warn!(error = %e, "ignoring malformed event");
                return Ok(Handled::proceed());
            }
        };

        match message {
            Message::AudioChunk { format, audio } => {
                self.append_audio(format, audio);
                Ok(Handled::proceed())
            }
            Message::AudioStop => self.finish_utterance().await,
            Message::AudioStart(format) => {
                debug!(?format, "audio started");
                Ok(Handled::proceed())
            }
            Message::Transcribe(request) => {
                debug!(
                    name = ?request.name,
                    language = ?request.language,
                    "transcribe requested"
                );
                Ok(Handled::proceed())
            }
            Message::Describe => {
                debug!("sending info");
                Ok(Handled::respond(Event::clone(&self.info)))
            }
            other => {
                debug!(event_type = other.event_type(), "ignoring event");
                Ok(Handled::proceed())
            }
        }
    }

    fn append_audio(&mut self, format: AudioFormat, audio: Vec<u8>) {
        if format != AudioFormat::EXPECTED && !self.warned_format {
            warn!(
                ?format,
                expected = ?AudioFormat::EXPECTED,
                "audio format differs from what the model expects, passing it through"
            );
            self.warned_format = true;
        }

        match &mut self.audio {
            Some(buffer) => buffer.extend_from_slice(&audio),
            None => {
                debug!("utterance started");
                self.audio = Some(audio);
            }
        }
    }

    async fn finish_utterance(&mut self) -> Result<Handled, SessionError> {
        let pcm = self
            .audio
            .take()
            .ok_or(ProtocolError::AudioStopWithoutAudio)?;

        debug!(bytes = pcm.len(), "audio stopped, transcribing");
        let text = self
            .gate
            .with_exclusive_access(move |model| model.transcribe(&pcm))
            .await?;

        info!(%text, "transcribed");
        Ok(Handled::finish(transcript_event(text)))
    }
}
