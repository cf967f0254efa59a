use leafdoc_types::prelude::*;

use crate::{confidence::normalize, label::parse};

/// Decimal places kept in reported confidences.
pub const CONFIDENCE_DECIMALS: i32 = 2;

pub fn entry(class: ClassLabel, raw_confidence: f64) -> PredictionEntry {
    let ParsedLabel { crop, disease } = parse(&class);
    PredictionEntry {
        crop,
        disease,
        confidence: normalize(raw_confidence).rounded(CONFIDENCE_DECIMALS),
        class,
    }
}

/// Turns raw `(label, score)` pairs into prediction entries.
///
/// Input order is kept as is; callers hand in predictions already sorted by
/// descending score.
pub fn format<I>(raw_predictions: I) -> Vec<PredictionEntry>
where
    I: IntoIterator<Item = (ClassLabel, f64)>,
{
    raw_predictions
        .into_iter()
        .map(|(class, raw)| entry(class, raw))
        .collect()
}
