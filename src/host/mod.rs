//! Boundary to the chat model being served.
//!
//! Everything behind [`HostModel`] is an external collaborator: model discovery,
//! quota and permission checks, the generation itself. The bridge only sees a
//! request going in and an ordered stream of [`StreamPart`]s coming out.

pub mod scripted;
pub mod upstream;

use crate::canonical::{Request, StreamPart};
use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;
use std::fmt;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

pub use scripted::ScriptedModel;
pub use upstream::UpstreamModel;

/// Output of one generation. Finite, ordered, consumed once.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<StreamPart, HostError>> + Send>>;

/// Error kinds the host model can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostErrorKind {
    InvalidMessage,
    InvalidModel,
    NoPermission,
    Blocked,
    QuotaExceeded,
    NotFound,
    Unknown,
}

impl fmt::Display for HostErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidMessage => "invalid message",
            Self::InvalidModel => "invalid model",
            Self::NoPermission => "no permission",
            Self::Blocked => "blocked",
            Self::QuotaExceeded => "quota exceeded",
            Self::NotFound => "not found",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct HostError {
    pub kind: HostErrorKind,
    pub message: String,
}

impl HostError {
    pub fn new(kind: HostErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(HostErrorKind::Unknown, "request cancelled")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostModelInfo {
    pub id: String,
    pub display_name: String,
    pub vendor: String,
}

#[async_trait]
pub trait HostModel: Send + Sync {
    /// Start a generation. The returned stream observes `cancel`.
    async fn send_request(
        &self,
        request: &Request,
        cancel: CancellationToken,
    ) -> Result<FragmentStream, HostError>;

    async fn count_tokens(&self, text: &str) -> Result<u64, HostError>;

    async fn list_models(&self) -> Result<Vec<HostModelInfo>, HostError>;
}
