//! Training and evaluation driver.
//!
//! Owns the parameter store, the model and an AdamW optimizer. Checkpoints are
//! the parameter store written as safetensors.

use std::path::Path;
use std::sync::Arc;

use candle_core::{DType, Device};
use candle_nn::optim::{AdamW, Optimizer, ParamsAdamW};
use candle_nn::{VarBuilder, VarMap};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::{ModelConfig, TrainConfig};
use crate::data::QaDataset;
use crate::error::TrainError;
use crate::kb::KnowledgeBase;
use crate::reason::{TransferNet, top_entities};

pub type TrainResult<T> = std::result::Result<T, TrainError>;

/// Per-epoch training summary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochReport {
    pub epoch: usize,
    pub mean_loss: f32,
    /// Validation hits@1, when validation ran this epoch.
    pub hits_at_1: Option<f32>,
}

/// Result of [`evaluate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub examples: usize,
    pub hits: usize,
}

impl Evaluation {
    pub fn hits_at_1(&self) -> f32 {
        if self.examples == 0 {
            0.0
        } else {
            self.hits as f32 / self.examples as f32
        }
    }
}

/// Build a fresh parameter store and model on `device`.
pub fn build_model(
    config: ModelConfig,
    kb: Arc<KnowledgeBase>,
    num_words: usize,
    device: &Device,
) -> TrainResult<(VarMap, TransferNet)> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let model = TransferNet::new(config, kb, num_words, vb)?;
    Ok((varmap, model))
}

/// Build a model and overwrite its parameters from a checkpoint.
pub fn load_model(
    config: ModelConfig,
    kb: Arc<KnowledgeBase>,
    num_words: usize,
    checkpoint: &Path,
    device: &Device,
) -> TrainResult<(VarMap, TransferNet)> {
    let (mut varmap, model) = build_model(config, kb, num_words, device)?;
    varmap.load(checkpoint).map_err(|e| TrainError::Checkpoint {
        path: checkpoint.display().to_string(),
        message: e.to_string(),
    })?;
    tracing::info!(path = %checkpoint.display(), "loaded checkpoint");
    Ok((varmap, model))
}

/// Fraction of examples whose top-scoring entity is a gold answer.
pub fn evaluate(model: &TransferNet, data: &QaDataset, batch_size: usize) -> TrainResult<Evaluation> {
    if data.is_empty() {
        return Err(TrainError::EmptyDataset);
    }
    let mut hits = 0;
    for indices in data.batch_indices::<StdRng>(batch_size, None) {
        let batch = data.batch(&indices, model.device())?;
        let out = model.infer(&batch.questions, &batch.seeds)?;
        let scores = out.scores.to_vec2::<f32>()?;
        for (row, gold) in scores.iter().zip(&batch.answer_ids) {
            if let Some(&(best, _)) = top_entities(row, 1).first() {
                if gold.contains(&best) {
                    hits += 1;
                }
            }
        }
    }
    Ok(Evaluation {
        examples: data.len(),
        hits,
    })
}

pub struct Trainer {
    config: TrainConfig,
    varmap: VarMap,
    model: TransferNet,
    optimizer: AdamW,
    rng: StdRng,
}

impl Trainer {
    pub fn new(
        model_config: ModelConfig,
        config: TrainConfig,
        kb: Arc<KnowledgeBase>,
        num_words: usize,
        device: &Device,
    ) -> TrainResult<Self> {
        // The CPU backend draws from the thread rng and refuses explicit seeds.
        if !device.is_cpu() {
            device.set_seed(config.seed)?;
        }
        let (varmap, model) = build_model(model_config, kb, num_words, device)?;
        let optimizer = AdamW::new(
            varmap.all_vars(),
            ParamsAdamW {
                lr: config.learning_rate,
                weight_decay: config.weight_decay,
                ..Default::default()
            },
        )?;
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            varmap,
            model,
            optimizer,
        })
    }

    pub fn model(&self) -> &TransferNet {
        &self.model
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// One pass over shuffled mini-batches; returns the mean batch loss.
    pub fn train_epoch(&mut self, data: &QaDataset) -> TrainResult<f32> {
        if data.is_empty() {
            return Err(TrainError::EmptyDataset);
        }
        let groups = data.batch_indices(self.config.batch_size, Some(&mut self.rng));
        let mut total = 0.0f32;
        for indices in &groups {
            let batch = data.batch(indices, self.model.device())?;
            let loss = self
                .model
                .loss(&batch.questions, &batch.seeds, &batch.answers)?;
            self.optimizer.backward_step(&loss)?;
            total += loss.to_scalar::<f32>()?;
        }
        Ok(total / groups.len() as f32)
    }

    /// Train for the configured number of epochs, validating every
    /// `eval_every` epochs when a validation set is given.
    pub fn fit(&mut self, train: &QaDataset, valid: Option<&QaDataset>) -> TrainResult<Vec<EpochReport>> {
        let mut reports = Vec::with_capacity(self.config.epochs);
        for epoch in 1..=self.config.epochs {
            let mean_loss = self.train_epoch(train)?;

            let due = self.config.eval_every > 0 && epoch % self.config.eval_every == 0;
            let hits_at_1 = match valid {
                Some(valid) if due => {
                    Some(evaluate(&self.model, valid, self.config.batch_size)?.hits_at_1())
                }
                _ => None,
            };

            tracing::info!(epoch, mean_loss, ?hits_at_1, "finished epoch");
            reports.push(EpochReport {
                epoch,
                mean_loss,
                hits_at_1,
            });
        }
        Ok(reports)
    }

    pub fn save_checkpoint(&self, path: &Path) -> TrainResult<()> {
        let checkpoint_err = |message: String| TrainError::Checkpoint {
            path: path.display().to_string(),
            message,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| checkpoint_err(e.to_string()))?;
        }
        self.varmap
            .save(path)
            .map_err(|e| checkpoint_err(e.to_string()))?;
        tracing::info!(path = %path.display(), "saved checkpoint");
        Ok(())
    }
}
