//! The `do-fx` interceptor: turns an effect map into side effects.

use cascade_common::{CascadeError, EffectKind, EffectMap, Payload};
use tracing::debug;

use super::{kinds, EffectError, EffectHandler, FxDeps};
use crate::diagnostics::Diagnostic;
use crate::interceptor::{Context, Interceptor};

/// Executes the effect map in the after phase; does nothing on the way in.
///
/// Each entry is resolved independently. A missing handler or a malformed
/// payload is reported and skipped. A handler failure stops the remaining
/// entries and propagates out of the chain.
///
/// Entries run with `db` first and the rest in insertion order. That order is
/// an implementation detail, not part of the contract.
pub struct DoFx {
    deps: FxDeps,
}

impl DoFx {
    pub const ID: &'static str = "do-fx";

    pub fn new(deps: FxDeps) -> Self {
        Self { deps }
    }

    pub fn deps(&self) -> &FxDeps {
        &self.deps
    }

    /// Execute every entry of `effects`.
    pub fn run(&self, effects: &EffectMap) -> Result<(), CascadeError> {
        let db_first = effects
            .iter()
            .filter(|(kind, _)| kind.as_str() == kinds::DB)
            .chain(effects.iter().filter(|(kind, _)| kind.as_str() != kinds::DB));

        for (kind, payload) in db_first {
            match self.deps.effects.require(kind.as_str()) {
                Ok(handler) => self.apply(kind, handler.as_ref(), payload)?,
                Err(_) => self.deps.diagnostics.report(&Diagnostic::MissingEffectHandler {
                    kind: kind.clone(),
                    location: "effect map",
                }),
            }
        }
        Ok(())
    }

    fn apply(
        &self,
        kind: &EffectKind,
        handler: &dyn EffectHandler,
        payload: &Payload,
    ) -> Result<(), CascadeError> {
        debug!(kind = kind.as_str(), "Executing effect");
        match handler.handle(payload, &self.deps) {
            Ok(()) => Ok(()),
            Err(EffectError::Malformed(reason)) => {
                self.deps.diagnostics.report(&Diagnostic::MalformedPayload {
                    kind: kind.clone(),
                    reason,
                });
                Ok(())
            }
            Err(EffectError::Failed(source)) => Err(CascadeError::EffectFailed {
                kind: kind.to_string(),
                source,
            }),
        }
    }
}

impl Interceptor for DoFx {
    fn id(&self) -> &str {
        Self::ID
    }

    fn after(&self, ctx: &mut Context) -> Result<(), CascadeError> {
        self.run(&ctx.effects)
    }
}
