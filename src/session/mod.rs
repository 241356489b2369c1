//! Session handling for client connections
//!
//! One `Session` per connection:
//! - Idle: no audio buffered
//! - Receiving: audio chunks accumulate until `audio-stop`
//!
//! `audio-stop` runs one transcription through the shared inference gate and
//! ends the exchange.

mod machine;

pub use machine::{Handled, ProtocolError, Session, SessionError};
