use std::{fs, io::Write, path::PathBuf};

use anyhow::{ensure, Context};
use bon::bon;
use image::{imageops::FilterType, DynamicImage};
use leafdoc_types::ClassLabel;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::{
    classifier::Classifier,
    network::{Activations, Network},
};

/// Size the network expects its input images to be resized to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    pub width: u32,
    pub height: u32,
}

impl InputSpec {
    /// Three values per pixel, channel interleaved.
    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything needed to classify a leaf image: class labels in output order,
/// input geometry and the trained weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle {
    classes: Vec<ClassLabel>,
    input: InputSpec,
    network: Network,
}

#[bon]
impl ModelBundle {
    pub fn new(classes: Vec<ClassLabel>, input: InputSpec, network: Network) -> anyhow::Result<Self> {
        let bundle = Self {
            classes,
            input,
            network,
        };
        bundle.validate()?;
        Ok(bundle)
    }

    #[builder]
    pub fn from_pretrained(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let data = fs::read(&path)
            .with_context(|| format!("Failed to read model file {}", path.display()))?;
        let bundle: Self = bincode::deserialize(&data).context("Failed to deserialize model")?;
        bundle.validate()?;
        tracing::info!(
            classes = bundle.classes.len(),
            width = bundle.input.width,
            height = bundle.input.height,
            "model loaded from {}",
            path.display()
        );
        Ok(bundle)
    }

    pub fn save(&self, path: impl Into<PathBuf>) -> anyhow::Result<()> {
        let path = path.into();
        let data = bincode::serialize(self).context("Failed to serialize model")?;
        fs::File::create(&path)
            .and_then(|mut file| file.write_all(&data))
            .with_context(|| format!("Failed to write model file {}", path.display()))?;
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.classes.is_empty(), "model has no classes");
        ensure!(!self.input.is_empty(), "model input size is zero");
        ensure!(
            self.network.input_size() == Some(self.input.len()),
            "network expects {:?} inputs but images give {}",
            self.network.input_size(),
            self.input.len()
        );
        ensure!(
            self.network.output_size() == Some(self.classes.len()),
            "network has {:?} outputs for {} classes",
            self.network.output_size(),
            self.classes.len()
        );
        Ok(())
    }

    pub fn input(&self) -> InputSpec {
        self.input
    }

    /// RGB, resized to the model input, scaled into `[0, 1]`.
    pub fn preprocess(&self, image: &DynamicImage) -> Activations {
        let InputSpec { width, height } = self.input;
        let image = image.resize_exact(width, height, FilterType::Triangle);
        let values = image
            .into_rgb8()
            .into_raw()
            .into_iter()
            .map(|x| x as f32 / u8::MAX as f32);
        Activations(Array1::from_iter(values))
    }
}

impl Classifier for ModelBundle {
    fn classes(&self) -> &[ClassLabel] {
        &self.classes
    }

    fn classify(&self, image: &DynamicImage, top_k: usize) -> anyhow::Result<Vec<(ClassLabel, f64)>> {
        let probabilities = self.network.forward(&self.preprocess(image))?;
        Network::ranked(&probabilities)
            .into_iter()
            .take(top_k.max(1))
            .map(|(idx, p)| {
                let label = self
                    .classes
                    .get(idx)
                    .with_context(|| format!("no class for output {idx}"))?;
                Ok((label.clone(), f64::from(p)))
            })
            .collect()
    }
}
