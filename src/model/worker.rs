//! Model hosted in an external worker process
//!
//! The worker loads the checkpoint once and then answers requests over its
//! stdin/stdout:
//!
//! - startup: the worker prints `ready` once the model is loaded
//! - request: `[4 bytes: PCM length u32 LE] [N bytes: 16-bit LE mono PCM]`
//! - response: one line, `ok <text>` or `error <message>`; the text must not
//!   contain newlines
//!
//! Once a reply cannot be framed the conversation is out of step, so the
//! worker is treated as gone from then on.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use tracing::{debug, info, warn};

use super::{InferenceError, ModelLoadError, ModelVariant, SpeechModel};

/// A running model worker
pub struct WorkerModel {
    variant: ModelVariant,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    poisoned: bool,
}

impl WorkerModel {
    /// Spawn `command` and wait for it to report that the model is loaded
    pub fn start(variant: ModelVariant, mut command: Command) -> Result<Self, ModelLoadError> {
        let program = command.get_program().to_string_lossy().into_owned();
        let spawn_error = |source| ModelLoadError::Spawn {
            command: program.clone(),
            source,
        };

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(spawn_error)?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            return Err(spawn_error(std::io::Error::other(
                "worker stdio was not captured",
            )));
        };

        let mut worker = Self {
            variant,
            child,
            stdin,
            stdout: BufReader::new(stdout),
            poisoned: false,
        };

        match worker.read_line() {
            Ok(line) if line == "ready" => {
                info!(%variant, pid = worker.child.id(), "model worker ready");
                Ok(worker)
            }
            Ok(line) => Err(ModelLoadError::NotReady(format!(
                "expected 'ready', got '{line}'"
            ))),
            Err(e) => Err(ModelLoadError::NotReady(e.to_string())),
        }
    }

    fn read_line(&mut self) -> Result<String, InferenceError> {
        let mut line = String::new();
        if self.stdout.read_line(&mut line)? == 0 {
            return Err(InferenceError::WorkerExited);
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn exchange(&mut self, len: u32, pcm: &[u8]) -> Result<String, InferenceError> {
        self.stdin.write_all(&len.to_le_bytes())?;
        self.stdin.write_all(pcm)?;
        self.stdin.flush()?;
        self.read_line()
    }
}

impl SpeechModel for WorkerModel {
    fn transcribe(&mut self, pcm: &[u8]) -> Result<String, InferenceError> {
        let len = u32::try_from(pcm.len()).map_err(|_| {
            InferenceError::Backend(format!(
                "utterance of {} bytes is too large for the worker",
                pcm.len()
            ))
        })?;

        if self.poisoned {
            return Err(InferenceError::WorkerExited);
        }

        debug!(bytes = pcm.len(), "sending audio to model worker");
        let reply = self.exchange(len, pcm).and_then(|line| parse_reply(&line));
        let broken = matches!(
            reply,
            Err(InferenceError::Io(_) | InferenceError::InvalidOutput(_) | InferenceError::WorkerExited)
        );
        if broken {
            warn!("model worker conversation broken, refusing further requests");
            self.poisoned = true;
        }
        reply
    }

    fn name(&self) -> &str {
        self.variant.display_name()
    }
}

impl Drop for WorkerModel {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            warn!(?e, "failed to stop model worker");
        }
        let _ = self.child.wait();
    }
}

fn parse_reply(line: &str) -> Result<String, InferenceError> {
    let (status, rest) = line.split_once(' ').unwrap_or((line, ""));
    match status {
        "ok" => Ok(rest.to_string()),
        "error" => Err(InferenceError::Backend(rest.to_string())),
        _ => Err(InferenceError::InvalidOutput(line.to_string())),
    }
}
