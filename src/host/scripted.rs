//! Deterministic host model for tests and `--echo` mode.

use super::{FragmentStream, HostError, HostErrorKind, HostModel, HostModelInfo};
use crate::canonical::{Request, Role, StreamPart};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub const ECHO_MODEL_ID: &str = "echo";

#[derive(Debug, Clone)]
enum Script {
    /// Repeat the last user message back as one text fragment.
    Echo,
    Replay(Vec<StreamPart>),
    FailOnSend(HostError),
    FailAfter(Vec<StreamPart>, HostError),
}

#[derive(Debug, Clone)]
pub struct ScriptedModel {
    script: Script,
    calls: Arc<AtomicUsize>,
    last_request: Arc<Mutex<Option<Request>>>,
}

impl ScriptedModel {
    fn with_script(script: Script) -> Self {
        Self {
            script,
            calls: Arc::new(AtomicUsize::new(0)),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    pub fn echo() -> Self {
        Self::with_script(Script::Echo)
    }

    pub fn replay(parts: Vec<StreamPart>) -> Self {
        Self::with_script(Script::Replay(parts))
    }

    pub fn failing(kind: HostErrorKind, message: impl Into<String>) -> Self {
        Self::with_script(Script::FailOnSend(HostError::new(kind, message)))
    }

    /// Emit `parts`, then fail the stream with `kind`.
    pub fn failing_after(parts: Vec<StreamPart>, kind: HostErrorKind, message: impl Into<String>) -> Self {
        Self::with_script(Script::FailAfter(parts, HostError::new(kind, message)))
    }

    /// Number of generations started so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<Request> {
        self.last_request.lock().ok().and_then(|r| r.clone())
    }

    fn parts_for(&self, request: &Request) -> (Vec<StreamPart>, Option<HostError>) {
        match &self.script {
            Script::Echo => {
                let text = request
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.plain_text())
                    .unwrap_or_default();
                (vec![StreamPart::text(text)], None)
            }
            Script::Replay(parts) => (parts.clone(), None),
            Script::FailAfter(parts, err) => (parts.clone(), Some(err.clone())),
            Script::FailOnSend(err) => (Vec::new(), Some(err.clone())),
        }
    }
}

#[async_trait]
impl HostModel for ScriptedModel {
    async fn send_request(
        &self,
        request: &Request,
        cancel: CancellationToken,
    ) -> Result<FragmentStream, HostError> {
        if let Script::FailOnSend(err) = &self.script {
            return Err(err.clone());
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(request.clone());
        }

        let (parts, trailing_error) = self.parts_for(request);
        let stream = async_stream::stream! {
            for part in parts {
                if cancel.is_cancelled() {
                    yield Err(HostError::cancelled());
                    return;
                }
                yield Ok(part);
            }
            if let Some(err) = trailing_error {
                yield Err(err);
            }
        };
        Ok(Box::pin(stream))
    }

    async fn count_tokens(&self, text: &str) -> Result<u64, HostError> {
        Ok(text.split_whitespace().count() as u64)
    }

    async fn list_models(&self) -> Result<Vec<HostModelInfo>, HostError> {
        Ok(vec![HostModelInfo {
            id: ECHO_MODEL_ID.to_string(),
            display_name: "Echo".to_string(),
            vendor: "chat-bridge".to_string(),
        }])
    }
}
