//! Speech recognition backend
//!
//! The acoustic model is an opaque collaborator reached through the
//! `SpeechModel` trait. It only ever receives raw 16-bit little-endian mono
//! PCM bytes. Implementations are not expected to be reentrant; every call
//! goes through the `InferenceGate`.

mod gate;
mod worker;

use std::path::PathBuf;
use std::process::Command;

use tracing::info;

pub use gate::InferenceGate;
pub use worker::WorkerModel;

/// Contract for speech recognition backends
pub trait SpeechModel: Send {
    /// Transcribe one complete utterance
    fn transcribe(&mut self, pcm: &[u8]) -> Result<String, InferenceError>;

    /// Human-readable name for logs
    fn name(&self) -> &str;
}

/// The four published GigaAM checkpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelVariant {
    V1Ctc,
    V2Ctc,
    V1Rnnt,
    V2Rnnt,
}

impl ModelVariant {
    /// All variants, in the order they are advertised
    pub const ALL: [ModelVariant; 4] = [
        ModelVariant::V1Ctc,
        ModelVariant::V2Ctc,
        ModelVariant::V1Rnnt,
        ModelVariant::V2Rnnt,
    ];

    /// Selector tokens that pick this variant
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            ModelVariant::V1Ctc => &["v1_ctc"],
            ModelVariant::V2Ctc => &["v2_ctc", "ctc"],
            ModelVariant::V1Rnnt => &["v1_rnnt"],
            ModelVariant::V2Rnnt => &["v2_rnnt", "rnnt"],
        }
    }

    /// Name of the checkpoint on disk and on the worker command line
    pub fn canonical_name(self) -> &'static str {
        self.aliases()[0]
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ModelVariant::V1Ctc => "gigaAM-v1-CTC",
            ModelVariant::V2Ctc => "gigaAM-v2-CTC",
            ModelVariant::V1Rnnt => "GigaAM-v1-RNNT",
            ModelVariant::V2Rnnt => "GigaAM-v2-RNNT",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ModelVariant::V1Ctc => "GigaAM-v1 was trained with a wav2vec2-like approach and was fine-tuned with Connectionist Temporal Classification",
            ModelVariant::V2Ctc => "GigaAM-v2 was trained with a HuBERT-like approach and was fine-tuned with Connectionist Temporal Classification",
            ModelVariant::V1Rnnt => "GigaAM-v1 was trained with a wav2vec2-like approach and was fine-tuned with RNN Transducer loss",
            ModelVariant::V2Rnnt => "GigaAM-v2 was trained with a HuBERT-like approach and was fine-tuned with RNN Transducer loss",
        }
    }

    pub fn accepts(self, selector: &str) -> bool {
        self.aliases().contains(&selector)
    }

    pub fn from_selector(selector: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|variant| variant.accepts(selector))
    }
}

impl std::fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Everything needed to bring up a model
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Variant selector, e.g. `rnnt` or `v1_ctc`
    pub selector: String,
    /// Inference device handed to the worker, e.g. `cpu` or `cuda`
    pub device: String,
    /// Directory holding downloaded checkpoints
    pub data_dir: PathBuf,
    /// Worker program that hosts the model
    pub worker_command: String,
}

/// Errors that prevent the server from starting
#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("unknown model selector '{0}' (expected one of v1_ctc, v2_ctc, ctc, v1_rnnt, v2_rnnt, rnnt)")]
    UnknownVariant(String),

    #[error("data directory {} does not exist", .0.display())]
    DataDir(PathBuf),

    #[error("model weights not found at {}", .0.display())]
    MissingWeights(PathBuf),

    #[error("failed to start model worker '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("model worker did not become ready: {0}")]
    NotReady(String),
}

/// Errors raised by a transcription call
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("i/o error talking to model worker: {0}")]
    Io(#[from] std::io::Error),

    #[error("model worker exited")]
    WorkerExited,

    #[error("unexpected output from model worker: {0}")]
    InvalidOutput(String),

    #[error("inference task failed: {0}")]
    TaskFailed(String),
}

/// Resolve the selected variant, check its weights and start the worker.
///
/// Blocks until the worker reports that the model is loaded.
pub fn load_model(config: &ModelConfig) -> Result<Box<dyn SpeechModel>, ModelLoadError> {
    let variant = ModelVariant::from_selector(&config.selector)
        .ok_or_else(|| ModelLoadError::UnknownVariant(config.selector.clone()))?;

    if !config.data_dir.is_dir() {
        return Err(ModelLoadError::DataDir(config.data_dir.clone()));
    }

    let weights = config
        .data_dir
        .join(format!("{}.ckpt", variant.canonical_name()));
    if !weights.is_file() {
        return Err(ModelLoadError::MissingWeights(weights));
    }

    info!(
        %variant,
        device = %config.device,
        ?weights,
        "loading model"
    );

    let mut command = Command::new(&config.worker_command);
    command
        .arg("--model")
        .arg(variant.canonical_name())
        .arg("--device")
        .arg(&config.device)
        .arg("--data-dir")
        .arg(&config.data_dir);

    let model = WorkerModel::start(variant, command)?;
    Ok(Box::new(model))
}
