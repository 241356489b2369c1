//! Wyoming protocol support
//!
//! `event` frames events on the wire; `message` is the typed view that
//! sessions dispatch on.

mod event;
mod message;

pub use event::{read_event, write_event, Event};
pub use message::{transcript_event, AudioFormat, Message, MessageError, AUDIO_CHUNK};
