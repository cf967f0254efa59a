use std::path::{Path, PathBuf};

use anyhow::Context;
use leafdoc_core::{classifier::Classifier, format::format};
use leafdoc_types::PredictionEntry;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::Serialize;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::default_progress_style;

#[derive(Debug, Clone, Serialize)]
pub struct ImageReport {
    pub file: PathBuf,
    pub predictions: Vec<PredictionEntry>,
}

pub fn classify_file(
    model: &dyn Classifier,
    path: &Path,
    top_k: usize,
) -> anyhow::Result<ImageReport> {
    let image =
        image::open(path).with_context(|| format!("Failed to open image {}", path.display()))?;
    let raw = model
        .classify(&image, top_k)
        .with_context(|| format!("Prediction failed for {}", path.display()))?;
    Ok(ImageReport {
        file: path.to_owned(),
        predictions: format(raw),
    })
}

/// Classifies every file in parallel. Results keep the order of `files`.
pub fn classify_files(
    model: &dyn Classifier,
    files: &[PathBuf],
    top_k: usize,
) -> Vec<anyhow::Result<ImageReport>> {
    let span = tracing::info_span!("classify");
    span.pb_set_length(files.len() as u64);
    span.pb_set_style(&default_progress_style());
    let _entered = span.enter();

    files
        .par_iter()
        .map(|file| {
            let report = classify_file(model, file, top_k);
            span.pb_inc(1);
            report
        })
        .collect()
}
