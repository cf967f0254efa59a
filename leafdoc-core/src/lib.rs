pub mod classifier;
pub mod confidence;
pub mod format;
pub mod label;
pub mod model;
pub mod network;
pub mod recommend;

pub mod prelude {
    pub use crate::classifier::{Classifier, ModelHandle};
    pub use crate::confidence::normalize;
    pub use crate::format::format;
    pub use crate::label::{class_info, parse};
    pub use crate::model::{InputSpec, ModelBundle};
    pub use crate::recommend::{GeminiRecommender, Recommender};
}
