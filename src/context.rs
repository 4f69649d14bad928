//! Per-load context handed explicitly to each ingestion stage.

use tokio_util::sync::CancellationToken;

use std::sync::Arc;

use crate::{Config, Diagnostic};

/// Config snapshot, cancellation signal, tracing span and the diagnostics
/// collected while one profile is loaded.
#[derive(Debug)]
pub struct LoadContext {
    config: Arc<Config>,
    cancel: CancellationToken,
    span: tracing::Span,
    diagnostics: Vec<Diagnostic>,
}

impl LoadContext {
    pub fn new(config: Arc<Config>, profile: &str) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
            span: tracing::info_span!("ingest", profile = %profile),
            diagnostics: Vec::new(),
        }
    }

    /// Ties this load to an externally owned token, so a caller can abort it.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn record(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn extend_diagnostics(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.diagnostics.extend(diagnostics);
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_token_cancels_context() {
        let token = CancellationToken::new();
        let ctx = LoadContext::new(Arc::new(Config::default()), "cpu.pb.gz")
            .with_cancellation(token.clone());
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn diagnostics_accumulate_and_drain() {
        let mut ctx = LoadContext::new(Arc::new(Config::default()), "heap");
        ctx.record(Diagnostic::UnresolvedPath {
            path: "a.go".to_string(),
        });
        ctx.extend_diagnostics([Diagnostic::AmbiguousBasename {
            path: "b.go".to_string(),
            candidates: 2,
        }]);
        assert_eq!(ctx.diagnostics().len(), 2);
        assert_eq!(ctx.take_diagnostics().len(), 2);
        assert!(ctx.diagnostics().is_empty());
    }
}
