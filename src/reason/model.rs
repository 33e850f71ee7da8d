//! The reasoning model: encoders, per-hop query transforms, edge scorer and
//! answer gate wired into the hop loop.

use std::sync::Arc;

use candle_core::{D, Device, Tensor};
use candle_nn::ops::{sigmoid, softmax};
use candle_nn::{Linear, Module, VarBuilder, linear};
use rayon::prelude::*;

use crate::answer::{AnswerGate, weighted_squared_error};
use crate::config::ModelConfig;
use crate::encoder::{SequenceEncoder, TokenEmbedder};
use crate::error::ModelError;
use crate::kb::KnowledgeBase;
use crate::vocab::TokenBatch;

use super::{FrontierStats, Inference, ModelResult, ReasonOutput, frontier, transfer};

/// Hop-specific question transform: `tanh(W q + b)`.
struct HopQuery {
    proj: Linear,
}

impl HopQuery {
    fn new(dim_hidden: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            proj: linear(dim_hidden, dim_hidden, vb)?,
        })
    }

    fn forward(&self, pooled: &Tensor) -> candle_core::Result<Tensor> {
        self.proj.forward(pooled)?.tanh()
    }
}

/// Multi-hop reasoner over a shared, read-only knowledge base.
///
/// Parameters are created through the given [`VarBuilder`] under these names:
/// `word_embeddings`, `question_encoder`, `desc_encoder`, `hop_query.{t}`,
/// `edge_scorer`, `answer_gate`.
pub struct TransferNet {
    config: ModelConfig,
    kb: Arc<KnowledgeBase>,
    embedder: TokenEmbedder,
    question_encoder: SequenceEncoder,
    desc_encoder: SequenceEncoder,
    /// One independently weighted transform per hop, indexed by hop.
    hop_queries: Vec<HopQuery>,
    edge_scorer: Linear,
    answer_gate: AnswerGate,
    device: Device,
}

impl TransferNet {
    pub fn new(
        config: ModelConfig,
        kb: Arc<KnowledgeBase>,
        num_words: usize,
        vb: VarBuilder,
    ) -> ModelResult<Self> {
        config.validate()?;
        let (dw, h) = (config.dim_word, config.dim_hidden);

        let embedder =
            TokenEmbedder::new(num_words, dw, config.word_dropout, vb.pp("word_embeddings"))?;
        let question_encoder = SequenceEncoder::new(dw, h, vb.pp("question_encoder"))?;
        let desc_encoder = SequenceEncoder::new(dw, h, vb.pp("desc_encoder"))?;
        let hop_queries = (0..config.num_steps)
            .map(|t| HopQuery::new(h, vb.pp(format!("hop_query.{t}"))))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let edge_scorer = linear(h, 1, vb.pp("edge_scorer"))?;
        let answer_gate = AnswerGate::new(h, kb.num_entities(), vb.pp("answer_gate"))?;

        tracing::info!(
            entities = kb.num_entities(),
            edges = kb.num_edges(),
            words = num_words,
            hops = config.num_steps,
            max_active = config.max_active,
            "initialized transfer-net model"
        );

        Ok(Self {
            device: vb.device().clone(),
            config,
            kb,
            embedder,
            question_encoder,
            desc_encoder,
            hop_queries,
            edge_scorer,
            answer_gate,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn kb(&self) -> &KnowledgeBase {
        &self.kb
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Run all hops. Returns the loss when `answers` is given, otherwise the
    /// final scores with attention and score history.
    pub fn reason(
        &self,
        questions: &TokenBatch,
        seeds: &Tensor,
        answers: Option<&Tensor>,
        train: bool,
    ) -> ModelResult<ReasonOutput> {
        let inference = self.forward(questions, seeds, train)?;
        match answers {
            None => Ok(ReasonOutput::Inference(inference)),
            Some(answers) => Ok(ReasonOutput::Loss(self.score_loss(&inference, answers)?)),
        }
    }

    /// Inference pass with dropout disabled.
    pub fn infer(&self, questions: &TokenBatch, seeds: &Tensor) -> ModelResult<Inference> {
        self.forward(questions, seeds, false)
    }

    /// Training loss with dropout enabled.
    pub fn loss(
        &self,
        questions: &TokenBatch,
        seeds: &Tensor,
        answers: &Tensor,
    ) -> ModelResult<Tensor> {
        let inference = self.forward(questions, seeds, true)?;
        self.score_loss(&inference, answers)
    }

    fn score_loss(&self, inference: &Inference, answers: &Tensor) -> ModelResult<Tensor> {
        let (rows, _) = inference.scores.dims2()?;
        self.check_scores(answers, rows)?;
        Ok(weighted_squared_error(
            &inference.scores,
            answers,
            self.config.positive_weight,
        )?)
    }

    /// Transfer probabilities in (0, 1) for the given edges under one
    /// example's `[1, H]` question context.
    pub fn edge_probabilities(
        &self,
        edges: &[usize],
        context: &Tensor,
        train: bool,
    ) -> ModelResult<Tensor> {
        let desc = self.kb.descriptions(edges);
        let emb = self.embedder.forward(&desc.to_tensor(&self.device)?, train)?;
        let encoded = self.desc_encoder.forward(&emb, &desc.lengths())?;
        let logits = self
            .edge_scorer
            .forward(&encoded.pooled.broadcast_mul(context)?)?
            .squeeze(1)?;
        Ok(sigmoid(&logits)?)
    }

    fn forward(&self, questions: &TokenBatch, seeds: &Tensor, train: bool) -> ModelResult<Inference> {
        let bsz = questions.rows();
        self.check_scores(seeds, bsz)?;

        let ids = questions.to_tensor(&self.device)?;
        let emb = self.embedder.forward(&ids, train)?;
        let question = self.question_encoder.forward(&emb, &questions.lengths())?;

        let mut last_e = seeds.clone();
        let mut attentions = Vec::with_capacity(self.config.num_steps);
        let mut history = Vec::with_capacity(self.config.num_steps + 1);
        history.push(seeds.detach());

        for (hop, hop_query) in self.hop_queries.iter().enumerate() {
            let query = hop_query.forward(&question.pooled)?;
            // Padding positions are not masked.
            let logits = question
                .states
                .broadcast_mul(&query.unsqueeze(1)?)?
                .sum(D::Minus1)?;
            let attention = softmax(&logits, D::Minus1)?;
            let context = attention
                .unsqueeze(1)?
                .matmul(&question.states)?
                .squeeze(1)?;
            attentions.push(attention);

            let host = last_e.to_vec2::<f32>()?;
            let rows = (0..bsz)
                .into_par_iter()
                .map(|i| {
                    self.hop_example(
                        &last_e.get(i)?,
                        &host[i],
                        &context.narrow(0, i, 1)?,
                        train,
                    )
                })
                .collect::<ModelResult<Vec<_>>>()?;
            let (next, stats): (Vec<Tensor>, Vec<FrontierStats>) = rows.into_iter().unzip();

            tracing::debug!(
                hop,
                active = stats.iter().map(|s| s.active).sum::<usize>(),
                candidates = stats.iter().map(|s| s.candidates).sum::<usize>(),
                "expanded hop frontier"
            );

            last_e = transfer::renormalize(&Tensor::stack(&next, 0)?)?;
            history.push(last_e.detach());
        }

        let scores = self.answer_gate.apply(&question.pooled, &last_e)?;
        Ok(Inference {
            scores,
            attentions,
            history,
        })
    }

    /// One example's active-set selection, candidate gathering, edge scoring
    /// and transfer.
    fn hop_example(
        &self,
        scores: &Tensor,
        host_scores: &[f32],
        context: &Tensor,
        train: bool,
    ) -> ModelResult<(Tensor, FrontierStats)> {
        let active = frontier::select_active(
            host_scores,
            self.config.max_active,
            self.config.active_threshold,
        );
        let edges = frontier::gather_candidates(&self.kb, &active, self.config.max_candidates());
        let stats = FrontierStats {
            active: active.len(),
            candidates: edges.len(),
        };
        if edges.is_empty() {
            return Ok((scores.zeros_like()?, stats));
        }

        let p = self.edge_probabilities(&edges, context, train)?;
        let (subjects, objects) = self.kb.endpoints(&edges);
        let n = edges.len();
        let subjects = Tensor::from_vec(subjects, n, &self.device)?;
        let objects = Tensor::from_vec(objects, n, &self.device)?;
        Ok((transfer::follow(scores, &subjects, &objects, &p)?, stats))
    }

    fn check_scores(&self, scores: &Tensor, rows: usize) -> ModelResult<()> {
        let (batch, width) = scores.dims2()?;
        if batch != rows {
            return Err(ModelError::BatchMismatch {
                questions: rows,
                seeds: batch,
            });
        }
        if width != self.kb.num_entities() {
            return Err(ModelError::EntityCount {
                expected: self.kb.num_entities(),
                actual: width,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::VarMap;

    use crate::kb::EdgeRecord;

    fn tiny_config() -> ModelConfig {
        ModelConfig {
            dim_word: 8,
            dim_hidden: 8,
            num_steps: 2,
            max_active: 4,
            ..Default::default()
        }
    }

    fn tiny_model() -> (VarMap, TransferNet) {
        let kb = KnowledgeBase::build(
            4,
            2,
            vec![
                EdgeRecord::new(0, 1, vec![1, 2]),
                EdgeRecord::new(1, 2, vec![3]),
                EdgeRecord::new(1, 3, vec![4]),
            ],
        )
        .unwrap();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = TransferNet::new(tiny_config(), Arc::new(kb), 6, vb).unwrap();
        (varmap, model)
    }

    #[test]
    fn invalid_config_is_rejected() {
        let kb = KnowledgeBase::build(1, 1, Vec::new()).unwrap();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = ModelConfig {
            dim_hidden: 7,
            ..tiny_config()
        };
        let err = TransferNet::new(config, Arc::new(kb), 4, vb).err().unwrap();
        assert!(matches!(err, ModelError::Config(_)));
    }

    #[test]
    fn every_hop_has_its_own_query_weights() {
        let (varmap, _model) = tiny_model();
        let names: Vec<String> = varmap.data().lock().unwrap().keys().cloned().collect();
        assert!(names.iter().any(|n| n == "hop_query.0.weight"));
        assert!(names.iter().any(|n| n == "hop_query.1.weight"));
        assert!(!names.iter().any(|n| n == "hop_query.2.weight"));
    }

    #[test]
    fn inference_shapes_and_history_length() {
        let (_vm, model) = tiny_model();
        let questions = TokenBatch::from_rows(&[vec![1, 2, 3], vec![4, 5, 0]]);
        let seeds = Tensor::new(&[[1f32, 0., 0., 0.], [0., 1., 0., 0.]], &Device::Cpu).unwrap();
        let out = model.infer(&questions, &seeds).unwrap();
        assert_eq!(out.scores.dims(), &[2, 4]);
        assert_eq!(out.attentions.len(), 2);
        assert_eq!(out.attentions[0].dims(), &[2, 3]);
        assert_eq!(out.history.len(), 3);
        assert_eq!(
            out.history[0].to_vec2::<f32>().unwrap(),
            seeds.to_vec2::<f32>().unwrap()
        );
    }

    #[test]
    fn edge_probabilities_are_open_unit_interval() {
        let (_vm, model) = tiny_model();
        let context = Tensor::randn(0f32, 1.0, (1, 8), &Device::Cpu).unwrap();
        let p = model.edge_probabilities(&[0, 1, 2], &context, false).unwrap();
        let p = p.to_vec1::<f32>().unwrap();
        assert_eq!(p.len(), 3);
        assert!(p.iter().all(|&v| v > 0.0 && v < 1.0));
    }

    #[test]
    fn mismatched_batch_is_rejected() {
        let (_vm, model) = tiny_model();
        let questions = TokenBatch::from_rows(&[vec![1, 2]]);
        let seeds = Tensor::zeros((2, 4), DType::F32, &Device::Cpu).unwrap();
        let err = model.infer(&questions, &seeds).unwrap_err();
        assert!(matches!(err, ModelError::BatchMismatch { questions: 1, seeds: 2 }));
    }

    #[test]
    fn wrong_entity_width_is_rejected() {
        let (_vm, model) = tiny_model();
        let questions = TokenBatch::from_rows(&[vec![1, 2]]);
        let seeds = Tensor::zeros((1, 5), DType::F32, &Device::Cpu).unwrap();
        let err = model.infer(&questions, &seeds).unwrap_err();
        assert!(matches!(err, ModelError::EntityCount { expected: 4, actual: 5 }));
    }

    #[test]
    fn loss_is_a_finite_scalar_with_gradients() {
        let (varmap, model) = tiny_model();
        let questions = TokenBatch::from_rows(&[vec![1, 2, 3]]);
        let seeds = Tensor::new(&[[1f32, 0., 0., 0.]], &Device::Cpu).unwrap();
        let answers = Tensor::new(&[[0f32, 0., 1., 0.]], &Device::Cpu).unwrap();
        let loss = model.loss(&questions, &seeds, &answers).unwrap();
        let value = loss.to_scalar::<f32>().unwrap();
        assert!(value.is_finite() && value >= 0.0);

        let grads = loss.backward().unwrap();
        let data = varmap.data().lock().unwrap();
        let scorer = data.get("edge_scorer.weight").unwrap();
        assert!(grads.get(scorer.as_tensor()).is_some());
    }
}
