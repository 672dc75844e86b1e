//! Non-fatal problems found while executing effects.

use std::sync::Arc;

use cascade_common::EffectKind;
use thiserror::Error;
use tracing::{error, warn};

/// A problem that was reported and skipped rather than raised.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Diagnostic {
    #[error("no effect handler registered for \"{kind}\" (found in {location}); ignored")]
    MissingEffectHandler {
        kind: EffectKind,
        location: &'static str,
    },

    #[error("\"{kind}\" effect got a malformed payload: {reason}")]
    MalformedPayload { kind: EffectKind, reason: String },

    #[error("no event handler registered for \"{id}\"; event dropped")]
    MissingEventHandler { id: String },

    #[error("\"fx\" effect should not contain a \"db\" effect; put it at the top level")]
    DbInsideFx,
}

impl Diagnostic {
    pub fn malformed(kind: &str, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            kind: EffectKind::from(kind),
            reason: reason.into(),
        }
    }

    /// Advisory diagnostics describe questionable but executed input.
    pub fn is_advisory(&self) -> bool {
        matches!(self, Self::DbInsideFx)
    }
}

/// Diagnostic sink. Never fails.
pub trait Diagnostics: Send + Sync {
    fn report(&self, diagnostic: &Diagnostic);
}

impl<T: Diagnostics + ?Sized> Diagnostics for Arc<T> {
    fn report(&self, diagnostic: &Diagnostic) {
        (**self).report(diagnostic)
    }
}

/// Production sink: every diagnostic becomes a `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn report(&self, diagnostic: &Diagnostic) {
        if diagnostic.is_advisory() {
            warn!(%diagnostic, "Effect diagnostic");
        } else {
            error!(%diagnostic, "Effect diagnostic");
        }
    }
}
