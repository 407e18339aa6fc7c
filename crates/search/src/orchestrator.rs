//! Resolves the literal search string for a conversation turn

use kgforge_common::errors::{AppError, Result};
use kgforge_common::llm::{ChatRole, ChatTurn, QueryReformulator};
use std::sync::Arc;
use tracing::{debug, warn};

/// Picks between the raw utterance and an LLM-reformulated query
pub struct QueryOrchestrator {
    reformulator: Option<Arc<dyn QueryReformulator>>,
}

impl QueryOrchestrator {
    pub fn new(reformulator: Arc<dyn QueryReformulator>) -> Self {
        Self {
            reformulator: Some(reformulator),
        }
    }

    /// Orchestrator for deployments without a chat model; follow-up turns fail
    pub fn without_reformulator() -> Self {
        Self { reformulator: None }
    }

    /// `messages` ends with the current user utterance.
    ///
    /// A first turn is searched verbatim. Later turns are rewritten by the
    /// reformulator and its failures are returned, never papered over with
    /// the raw utterance.
    pub async fn resolve(&self, messages: &[ChatTurn]) -> Result<String> {
        let current = messages
            .last()
            .filter(|t| t.role == ChatRole::User)
            .ok_or_else(|| AppError::Validation {
                message: "conversation must end with a user message".to_string(),
                field: Some("messages".to_string()),
            })?;

        let utterance = current.content.trim();
        if utterance.is_empty() {
            return Err(AppError::Validation {
                message: "current message is empty".to_string(),
                field: Some("messages".to_string()),
            });
        }

        if is_first_turn(messages) {
            debug!("First turn, searching utterance verbatim");
            return Ok(utterance.to_string());
        }

        let reformulator = self.reformulator.as_ref().ok_or_else(|| {
            AppError::configuration(
                "follow-up turn received but no reformulation model is configured",
            )
        })?;

        reformulator.reformulate(messages).await.map_err(|e| {
            warn!(error = %e, "Query reformulation failed");
            e
        })
    }
}

/// No earlier user or assistant turn; system turns do not count
fn is_first_turn(messages: &[ChatTurn]) -> bool {
    messages[..messages.len().saturating_sub(1)]
        .iter()
        .all(|t| t.role == ChatRole::System)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        reply: Result<String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl QueryReformulator for Scripted {
        async fn reformulate(&self, _history: &[ChatTurn]) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Ok(q) => Ok(q.clone()),
                Err(_) => Err(AppError::Reformulation {
                    message: "model refused".to_string(),
                }),
            }
        }
    }

    fn scripted(reply: Result<String>) -> Arc<Scripted> {
        Arc::new(Scripted {
            reply,
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_first_turn_is_verbatim() {
        let model = scripted(Ok("rewritten".into()));
        let orchestrator = QueryOrchestrator::new(model.clone());

        let query = orchestrator
            .resolve(&[ChatTurn::user("  Who founded Acme? ")])
            .await
            .unwrap();

        assert_eq!(query, "Who founded Acme?");
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_follow_up_is_reformulated() {
        let model = scripted(Ok("When was Acme founded?".into()));
        let orchestrator = QueryOrchestrator::new(model.clone());

        let query = orchestrator
            .resolve(&[
                ChatTurn::user("Who founded Acme?"),
                ChatTurn::assistant("Jane Doe founded Acme."),
                ChatTurn::user("When?"),
            ])
            .await
            .unwrap();

        assert_eq!(query, "When was Acme founded?");
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reformulation_failure_surfaces() {
        let model = scripted(Err(AppError::Internal {
            message: String::new(),
        }));
        let orchestrator = QueryOrchestrator::new(model);

        let err = orchestrator
            .resolve(&[ChatTurn::user("a"), ChatTurn::assistant("b"), ChatTurn::user("c")])
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Reformulation { .. }));
    }

    #[tokio::test]
    async fn test_rejects_missing_user_turn() {
        let orchestrator = QueryOrchestrator::without_reformulator();
        tokio_test::assert_err!(orchestrator.resolve(&[]).await);
        tokio_test::assert_err!(orchestrator.resolve(&[ChatTurn::assistant("hello")]).await);
        tokio_test::assert_err!(orchestrator.resolve(&[ChatTurn::user("   ")]).await);
    }

    #[tokio::test]
    async fn test_follow_up_without_model_is_configuration_error() {
        let orchestrator = QueryOrchestrator::without_reformulator();
        let err = orchestrator
            .resolve(&[ChatTurn::user("a"), ChatTurn::assistant("b"), ChatTurn::user("c")])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Configuration { .. }));
    }
}
