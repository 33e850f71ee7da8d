//! Answer gate and training loss.
//!
//! The gate is a question-conditioned per-entity sigmoid that suppresses
//! entities the question deems implausible, whether or not the graph walk
//! reached them.

use candle_core::{Result, Tensor};
use candle_nn::ops::sigmoid;
use candle_nn::{Linear, Module, VarBuilder, linear};

pub struct AnswerGate {
    proj: Linear,
}

impl AnswerGate {
    pub fn new(dim_hidden: usize, num_entities: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            proj: linear(dim_hidden, num_entities, vb)?,
        })
    }

    /// `[b, H]` pooled questions to `[b, num_entities]` gates in (0, 1).
    pub fn gate(&self, pooled: &Tensor) -> Result<Tensor> {
        sigmoid(&self.proj.forward(pooled)?)
    }

    /// Multiply the gate into the final hop distribution.
    pub fn apply(&self, pooled: &Tensor, scores: &Tensor) -> Result<Tensor> {
        scores.mul(&self.gate(pooled)?)
    }
}

/// Mean of `(positive_weight * y + 1) * (pred - y)^2` over all entries.
pub fn weighted_squared_error(pred: &Tensor, answers: &Tensor, positive_weight: f32) -> Result<Tensor> {
    let weight = answers.affine(positive_weight as f64, 1.0)?;
    let sq = pred.sub(answers)?.sqr()?;
    weight.mul(&sq)?.mean_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn positives_weigh_ten_times_negatives() {
        let pred = Tensor::new(&[[0.5f32, 0.5]], &Device::Cpu).unwrap();
        let answers = Tensor::new(&[[1.0f32, 0.0]], &Device::Cpu).unwrap();
        let loss = weighted_squared_error(&pred, &answers, 9.0)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        // (10 * 0.25 + 1 * 0.25) / 2
        assert!((loss - 1.375).abs() < 1e-6);
    }

    #[test]
    fn perfect_prediction_has_zero_loss() {
        let y = Tensor::new(&[[1.0f32, 0.0, 1.0], [0.0, 0.0, 1.0]], &Device::Cpu).unwrap();
        let loss = weighted_squared_error(&y, &y, 9.0)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert_eq!(loss, 0.0);
    }

    #[test]
    fn gate_is_in_unit_interval() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let gate = AnswerGate::new(4, 6, vb.pp("answer_gate")).unwrap();
        let pooled = Tensor::randn(0f32, 1.0, (2, 4), &Device::Cpu).unwrap();
        let g = gate.gate(&pooled).unwrap();
        assert_eq!(g.dims(), &[2, 6]);
        for row in g.to_vec2::<f32>().unwrap() {
            assert!(row.iter().all(|&v| v > 0.0 && v < 1.0));
        }
    }
}
