//! Multi-hop reasoning: the hop controller and its building blocks.
//!
//! Each hop derives a hop-specific query from the pooled question, attends
//! over question tokens, expands a capped frontier of active entities, scores
//! the candidate edges by their text descriptions, and moves score mass along
//! them with [`transfer::follow`].

pub mod frontier;
pub mod model;
pub mod transfer;

use candle_core::Tensor;

pub use model::TransferNet;

/// Result type for model operations.
pub type ModelResult<T> = std::result::Result<T, crate::error::ModelError>;

/// Everything an inference pass exposes for inspection.
#[derive(Debug, Clone)]
pub struct Inference {
    /// Final gated entity scores `[b, num_entities]`.
    pub scores: Tensor,
    /// Question-token attention `[b, L]`, one entry per hop.
    pub attentions: Vec<Tensor>,
    /// Score snapshots `[b, num_entities]`: the seed, then one per hop (detached).
    pub history: Vec<Tensor>,
}

/// Output of [`TransferNet::reason`].
#[derive(Debug, Clone)]
pub enum ReasonOutput {
    /// No answers were supplied.
    Inference(Inference),
    /// Scalar weighted squared-error loss against the supplied answers.
    Loss(Tensor),
}

/// Sizes of one example's frontier at one hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrontierStats {
    pub active: usize,
    pub candidates: usize,
}

/// The `k` highest-scoring entities of one score row, best first.
/// Ties keep the lower entity id first.
pub fn top_entities(scores: &[f32], k: usize) -> Vec<(u32, f32)> {
    let mut ranked: Vec<(u32, f32)> = scores
        .iter()
        .enumerate()
        .map(|(i, &s)| (i as u32, s))
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(k);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_entities_ranks_descending_with_stable_ties() {
        let ranked = top_entities(&[0.1, 0.7, 0.7, 0.9], 3);
        assert_eq!(ranked, vec![(3, 0.9), (1, 0.7), (2, 0.7)]);
    }

    #[test]
    fn top_entities_handles_short_rows() {
        assert_eq!(top_entities(&[0.5], 4), vec![(0, 0.5)]);
        assert!(top_entities(&[], 4).is_empty());
    }
}
