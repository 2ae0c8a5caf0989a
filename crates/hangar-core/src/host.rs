//! The host context handed to in-process capabilities.
//!
//! The capability store does not implement any of these services itself.
//! The embedding host (chat UI, document pipeline, app launcher) provides
//! an implementation and the invocation router exposes it to guests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by host-provided services.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// The host does not provide this service.
    #[error("host service unavailable: {0}")]
    Unavailable(String),

    /// The service ran and failed.
    #[error("host service failed: {0}")]
    Failed(String),
}

/// Result type for host services.
pub type HostResult<T> = Result<T, HostError>;

/// One hit from a document query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMatch {
    /// Source file name of the matching document.
    pub filename: String,
    /// Matching excerpt.
    pub content: String,
    /// Relevance score, when the backend reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

/// Services a host exposes to in-process capabilities.
///
/// Implementations are thin pass-throughs to collaborators outside the
/// store (document pipeline, application launcher).
#[async_trait]
pub trait HostContext: Send + Sync {
    /// Launch another installed capability (typically an application) by id.
    ///
    /// Returns a human-readable status line.
    async fn launch_capability(&self, id: &str) -> HostResult<String>;

    /// Query the document store.
    async fn query_documents(&self, text: &str) -> HostResult<Vec<DocumentMatch>>;

    /// List the file names of all stored documents.
    async fn list_documents(&self) -> HostResult<Vec<String>>;

    /// Add a document to the store.
    async fn add_document(&self, content: &str, filename: &str) -> HostResult<()>;

    /// Called after a document has been added, so the host can refresh
    /// whatever views depend on the document set.
    async fn document_uploaded(&self, _filename: &str) {}
}

/// A host that provides no services.
///
/// Used by the command-line front end, which has no document pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHost;

#[async_trait]
impl HostContext for NullHost {
    async fn launch_capability(&self, id: &str) -> HostResult<String> {
        Err(HostError::Unavailable(format!("cannot launch '{id}' without a host")))
    }

    async fn query_documents(&self, _text: &str) -> HostResult<Vec<DocumentMatch>> {
        Ok(Vec::new())
    }

    async fn list_documents(&self) -> HostResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn add_document(&self, _content: &str, filename: &str) -> HostResult<()> {
        Err(HostError::Unavailable(format!(
            "no document store to receive '{filename}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_host_answers_reads_and_refuses_writes() {
        let host = NullHost;
        assert!(host.list_documents().await.unwrap().is_empty());
        assert!(host.query_documents("rust").await.unwrap().is_empty());
        assert!(matches!(
            host.add_document("body", "notes.md").await,
            Err(HostError::Unavailable(_))
        ));
        assert!(matches!(
            host.launch_capability("calculator").await,
            Err(HostError::Unavailable(_))
        ));
    }

    #[test]
    fn document_match_omits_missing_score() {
        let hit = DocumentMatch {
            filename: "a.md".into(),
            content: "x".into(),
            score: None,
        };
        let json = serde_json::to_string(&hit).unwrap();
        assert!(!json.contains("score"));
    }
}
