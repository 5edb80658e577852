//! LSP-style enhancement seam.
//!
//! A real backend resolves symbols, types, and references against a
//! language server. The engine only requires the trait; enhancement is
//! optional and skipped entirely when disabled in settings.

use async_trait::async_trait;

use super::ParsedSource;

#[derive(Debug, thiserror::Error)]
pub enum EnhanceError {
    #[error("enhancement backend unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Failed(String),
}

/// Enhancement collaborator, applied per parsed file after parsing.
#[async_trait]
pub trait SnippetEnhancer: Send + Sync {
    async fn enhance(&self, parsed: ParsedSource) -> Result<ParsedSource, EnhanceError>;
}

/// Pass-through enhancer used when no LSP backend is wired in.
#[derive(Debug, Default)]
pub struct NoopEnhancer;

#[async_trait]
impl SnippetEnhancer for NoopEnhancer {
    async fn enhance(&self, parsed: ParsedSource) -> Result<ParsedSource, EnhanceError> {
        Ok(parsed)
    }
}
