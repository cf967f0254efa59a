use std::{cmp::Ordering, fmt::Debug};

use anyhow::ensure;
use bon::bon;
use derive_more::{AsRef, Index};
use ndarray::prelude::*;
use rand::random;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    /// (n_out, n_in)
    pub weights: Array2<f32>,
    pub bias: Array1<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Index, AsRef)]
pub struct Activations(#[index] pub Array1<f32>);

const EPSILON: f32 = 0.1;

pub fn relu(x: ArrayView1<f32>) -> Array1<f32> {
    x.map(|x| if *x <= 0.0 { EPSILON * x } else { *x })
}

pub fn softmax(logits: ArrayView1<f32>) -> Array1<f32> {
    let max_logit = logits.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let exp_logits = logits.map(|x| (x - max_logit).exp());
    let sum_exp_logits = exp_logits.sum();
    exp_logits.map(|x| x / sum_exp_logits)
}

#[bon]
impl Layer {
    pub fn new(weights: Array2<f32>, bias: Array1<f32>) -> Self {
        assert_eq!(weights.dim().0, bias.len());
        Self { weights, bias }
    }

    #[builder]
    pub fn forward(&self, prev_activation: &Activations) -> anyhow::Result<Activations> {
        let Activations(prev_activation) = prev_activation;
        ensure!(
            self.weights.dim().1 == prev_activation.dim(),
            "layer expects {} inputs, got {}",
            self.weights.dim().1,
            prev_activation.dim()
        );
        let z = self.weights.dot(prev_activation) + &self.bias;
        Ok(Activations(relu(z.view())))
    }
}

/// Dense feed-forward network with a softmax output layer.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Network {
    layers: Vec<Layer>,
}

#[bon]
impl Network {
    pub fn new(layers: Vec<Layer>) -> Self {
        Network { layers }
    }

    #[builder]
    pub fn untrained(input_size: usize, layer_spec: &[usize]) -> Self {
        let layers = layer_spec
            .iter()
            .scan(None, |prev_size_state, &size| {
                let prev_size = prev_size_state.unwrap_or(input_size);
                let generate = || random::<f32>() * (2.0 / prev_size as f32).sqrt();
                let weights = Array2::from_shape_fn((size, prev_size), |_| generate());
                let bias = Array1::from_shape_fn(size, |_| 0.0);
                *prev_size_state = Some(size);
                Some(Layer { weights, bias })
            })
            .collect();
        Network { layers }
    }

    pub fn input_size(&self) -> Option<usize> {
        self.layers.first().map(|layer| layer.weights.dim().1)
    }

    pub fn output_size(&self) -> Option<usize> {
        self.layers.last().map(|layer| layer.bias.len())
    }

    /// Runs every layer and returns the softmax of the last one.
    pub fn forward(&self, input: &Activations) -> anyhow::Result<Activations> {
        ensure!(!self.layers.is_empty(), "network has no layers");
        let output = self.layers.iter().try_fold(input.clone(), |activations, layer| {
            layer.forward().prev_activation(&activations).call()
        })?;
        let probabilities = softmax(output.0.view());
        ensure!(
            !probabilities.iter().any(|p| p.is_nan()),
            "NaN in output layer after softmax"
        );
        Ok(Activations(probabilities))
    }

    /// Output indices ordered by descending activation. Ties keep index order.
    pub fn ranked(outputs: &Activations) -> Vec<(usize, f32)> {
        let mut ranked: Vec<_> = outputs.0.iter().cloned().enumerate().collect();
        ranked.sort_by(|(_, x), (_, y)| y.partial_cmp(x).unwrap_or(Ordering::Equal));
        ranked
    }
}

impl Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let weights: Vec<_> = self.layers.iter().map(|l| l.weights.dim()).collect();
        let bias: Vec<_> = self.layers.iter().map(|l| l.bias.dim()).collect();
        write!(
            f,
            "Network {{ weights: {:#?}, bias: {:#?} }}",
            weights, bias
        )
    }
}
