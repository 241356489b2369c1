//! Process-wide mutual exclusion around the speech model

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use super::{InferenceError, SpeechModel};

/// Serializes every call into the shared model.
///
/// The gate owns the model, so the only way to reach it is through
/// `with_exclusive_access`. Waiters are served in FIFO order. The lock is held
/// by the blocking task running the call, so it is released when the call
/// finishes even if the requesting connection has already gone away.
#[derive(Clone)]
pub struct InferenceGate {
    model: Arc<Mutex<Box<dyn SpeechModel>>>,
}

impl InferenceGate {
    pub fn new(model: Box<dyn SpeechModel>) -> Self {
        Self {
            model: Arc::new(Mutex::new(model)),
        }
    }

    /// Run `f` with exclusive access to the model on the blocking pool
    pub async fn with_exclusive_access<T, F>(&self, f: F) -> Result<T, InferenceError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn SpeechModel) -> Result<T, InferenceError> + Send + 'static,
    {
        let mut guard = Arc::clone(&self.model).lock_owned().await;
        debug!(model = guard.name(), "inference gate acquired");

        let joined = tokio::task::spawn_blocking(move || {
            let result = f(&mut **guard);
            drop(guard);
            result
        })
        .await;

        debug!("inference gate released");
        joined.map_err(|e| InferenceError::TaskFailed(e.to_string()))?
    }
}

impl std::fmt::Debug for InferenceGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceGate").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::{FailingModel, RecordingModel};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_calls_never_overlap() {
        let model = RecordingModel::new("ok").with_delay(Duration::from_millis(10));
        let probe = model.probe();
        let gate = InferenceGate::new(Box::new(model));

        let tasks: Vec<_> = (0..8u8)
            .map(|i| {
                let gate = gate.clone();
                tokio::spawn(async move {
                    gate.with_exclusive_access(move |model| model.transcribe(&[i]))
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), "ok");
        }

        let mut calls = probe.calls();
        calls.sort();
        assert_eq!(calls, (0..8u8).map(|i| vec![i]).collect::<Vec<_>>());
        assert_eq!(probe.overlaps(), 0);
    }

    #[tokio::test]
    async fn test_gate_released_after_error() {
        let gate = InferenceGate::new(Box::new(FailingModel));

        let first = gate.with_exclusive_access(|model| model.transcribe(b"")).await;
        assert!(matches!(first, Err(InferenceError::Backend(_))));

        let second = gate.with_exclusive_access(|model| Ok(model.name().to_string())).await;
        assert_eq!(second.unwrap(), "failing");
    }

    #[tokio::test]
    async fn test_gate_released_after_panic() {
        let gate = InferenceGate::new(Box::new(RecordingModel::new("still here")));

        let panicked = gate
            .with_exclusive_access(|_model| -> Result<String, InferenceError> {
                panic!("decoder blew up")
            })
            .await;
        assert!(matches!(panicked, Err(InferenceError::TaskFailed(_))));

        let text = gate.with_exclusive_access(|model| model.transcribe(&[1, 2])).await;
        assert_eq!(text.unwrap(), "still here");
    }

    #[tokio::test]
    async fn test_gate_released_when_caller_is_cancelled() {
        let model = RecordingModel::new("done").with_delay(Duration::from_millis(50));
        let probe = model.probe();
        let gate = InferenceGate::new(Box::new(model));

        let abandoned = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.with_exclusive_access(|model| model.transcribe(&[7])).await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        abandoned.abort();

        let text = tokio::time::timeout(
            Duration::from_secs(5),
            gate.with_exclusive_access(|model| model.transcribe(&[8])),
        )
        .await
        .expect("gate stayed locked");
        assert_eq!(text.unwrap(), "done");
        assert_eq!(probe.calls().last(), Some(&vec![8]));
    }
}
