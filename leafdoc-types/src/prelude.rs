pub use crate::{ClassInfo, ClassLabel, ParsedLabel, Percentage, PredictionEntry, Recommendation};
