use std::sync::{Arc, OnceLock};

use image::DynamicImage;
use leafdoc_types::ClassLabel;

/// Anything that can score an image against a fixed set of classes.
pub trait Classifier: Send + Sync {
    fn classes(&self) -> &[ClassLabel];

    /// Returns at most `top_k` `(label, score)` pairs, highest score first.
    /// Asking for zero predictions still yields the best one.
    fn classify(&self, image: &DynamicImage, top_k: usize) -> anyhow::Result<Vec<(ClassLabel, f64)>>;
}

/// Process-wide slot for the loaded model.
///
/// Starts empty and is settled exactly once: either a model is installed or
/// the load failure is recorded. Read-only afterwards.
#[derive(Default, Clone)]
pub struct ModelHandle {
    slot: Arc<OnceLock<Arc<dyn Classifier>>>,
    failure: Arc<OnceLock<String>>,
}

impl ModelHandle {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn loaded(classifier: impl Classifier + 'static) -> Self {
        let handle = Self::empty();
        handle.install(classifier);
        handle
    }

    /// Returns `false` if a model was already installed or the load failed.
    pub fn install(&self, classifier: impl Classifier + 'static) -> bool {
        self.failure.get().is_none() && self.slot.set(Arc::new(classifier)).is_ok()
    }

    /// Records why loading failed. Returns `false` if the handle was already settled.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        !self.is_loaded() && self.failure.set(reason.into()).is_ok()
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.get().map(String::as_str)
    }

    pub fn get(&self) -> Option<Arc<dyn Classifier>> {
        self.slot.get().cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.slot.get().is_some()
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.slot.get(), self.failure()) {
            (Some(model), _) => write!(f, "ModelHandle {{ classes: {} }}", model.classes().len()),
            (None, Some(reason)) => write!(f, "ModelHandle {{ failed: {reason} }}"),
            (None, None) => write!(f, "ModelHandle {{ loading }}"),
        }
    }
}
