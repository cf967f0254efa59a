use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

pub mod prelude;

/// Raw class identifier emitted by the classifier, e.g.
/// `"Corn_(maize)___Cercospora_leaf_spot Gray_leaf_spot"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From)]
#[serde(transparent)]
pub struct ClassLabel(String);

impl ClassLabel {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClassLabel {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedLabel {
    pub crop: String,
    pub disease: String,
}

/// Confidence in percent. Always within `[Percentage::MIN, Percentage::MAX]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize, Display)]
#[serde(from = "f64", into = "f64")]
pub struct Percentage(f64);

impl Percentage {
    pub const MIN: f64 = 0.0;
    pub const MAX: f64 = 100.0;

    /// NaN maps to `MIN`, everything else is clamped into range.
    pub fn clamped(value: f64) -> Self {
        if value.is_nan() {
            return Self(Self::MIN);
        }
        Self(value.clamp(Self::MIN, Self::MAX))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    pub fn rounded(self, decimals: i32) -> Self {
        let factor = 10f64.powi(decimals);
        Self::clamped((self.0 * factor).round() / factor)
    }
}

impl From<f64> for Percentage {
    fn from(value: f64) -> Self {
        Self::clamped(value)
    }
}

impl From<Percentage> for f64 {
    fn from(Percentage(value): Percentage) -> Self {
        value
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionEntry {
    pub crop: String,
    pub disease: String,
    pub confidence: Percentage,
    pub class: ClassLabel,
}

/// Generated advice attached to a prediction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub severity: String,
    pub treatment: String,
    pub prevention: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub class: ClassLabel,
    pub crop: String,
    pub disease: String,
}
