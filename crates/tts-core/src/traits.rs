//! Trait definitions for pluggable pipeline logic.

use std::sync::Arc;

use crate::error::{TtsError, TtsResult};
use crate::types::{HookStage, ProsodyBundle};

/// External logic that may rewrite prosody mid-inference.
///
/// A hook receives the bundle computed so far and returns the bundle the
/// pipeline should continue with. The returned arrays must keep the shapes
/// of the input ones.
pub trait ProsodyHook: Send + Sync {
    /// Rewrite the bundle at the given stage.
    fn apply(&self, stage: HookStage, bundle: ProsodyBundle) -> TtsResult<ProsodyBundle>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "anonymous"
    }
}

impl<F> ProsodyHook for F
where
    F: Fn(HookStage, ProsodyBundle) -> TtsResult<ProsodyBundle> + Send + Sync,
{
    fn apply(&self, stage: HookStage, bundle: ProsodyBundle) -> TtsResult<ProsodyBundle> {
        self(stage, bundle)
    }
}

/// Ordered set of prosody hooks.
#[derive(Clone, Default)]
pub struct ProsodyHooks {
    hooks: Vec<Arc<dyn ProsodyHook>>,
}

impl std::fmt::Debug for ProsodyHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.hooks.iter().map(|hook| hook.name()))
            .finish()
    }
}

impl ProsodyHooks {
    /// Create an empty hook set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook; hooks run in registration order.
    pub fn register(&mut self, hook: Arc<dyn ProsodyHook>) {
        self.hooks.push(hook);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, hook: impl ProsodyHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Number of registered hooks.
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Whether no hook is registered.
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run every hook in order, checking that none of them reshapes the
    /// bundle or introduces non-finite values.
    pub fn run(&self, stage: HookStage, mut bundle: ProsodyBundle) -> TtsResult<ProsodyBundle> {
        let shape = bundle.shape();
        for hook in &self.hooks {
            bundle = hook.apply(stage, bundle)?;
            if bundle.shape() != shape {
                return Err(TtsError::hook(format!(
                    "hook '{}' changed array shapes at {stage}",
                    hook.name()
                )));
            }
            if !bundle.is_finite() {
                return Err(TtsError::hook(format!(
                    "hook '{}' produced non-finite values at {stage}",
                    hook.name()
                )));
            }
        }
        Ok(bundle)
    }
}
