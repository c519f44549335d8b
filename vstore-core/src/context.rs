//! Per-backend context: configuration plus the tracing span events attach to.
//!
//! Backends never log through a process-wide handle of their own. Each item
//! carries the context it was created with and emits events with
//! `parent: ctx.span()`, so the caller decides where they end up.

use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct StorageContext {
    config: Arc<StorageConfig>,
    span: tracing::Span,
}

impl StorageContext {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config: Arc::new(config),
            span: tracing::info_span!("vstore"),
        }
    }

    /// Attach events to `span` instead of the default `vstore` span.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn chunk_size(&self) -> usize {
        self.config.streams.chunk_size.max(1)
    }
}

impl Default for StorageContext {
    fn default() -> Self {
        Self::new(StorageConfig::default())
    }
}

/// Run `fut` unless `cancel` fires first.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StorageError::Cancelled),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancellable_completes() {
        let cancel = CancellationToken::new();
        let value = cancellable(&cancel, async { Ok::<_, StorageError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_cancellable_observes_token() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = cancellable(&cancel, async {
            futures::future::pending::<()>().await;
            Ok::<_, StorageError>(())
        })
        .await;
        assert!(matches!(result, Err(StorageError::Cancelled)));
    }

    #[test]
    fn test_context_exposes_config() {
        let ctx = StorageContext::default().with_span(tracing::Span::none());
        assert_eq!(ctx.chunk_size(), 64 * 1024);
        assert!(ctx.span().is_none());
    }
}
