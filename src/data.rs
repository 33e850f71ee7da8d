//! Question-answering datasets and mini-batching.
//!
//! A dataset file is a JSON array of examples, each holding an already
//! tokenized question, its topic entities and its answer entities.

use std::path::Path;

use candle_core::{Device, Tensor};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::DataError;
use crate::vocab::TokenBatch;

pub type DataResult<T> = std::result::Result<T, DataError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaExample {
    /// Token ids; padding (0) may or may not be present.
    pub question: Vec<u32>,
    /// Topic entities seeding the walk with score 1.
    pub topics: Vec<u32>,
    /// Gold answer entities.
    #[serde(default)]
    pub answers: Vec<u32>,
}

/// One mini-batch, ready for [`crate::reason::TransferNet`].
#[derive(Debug)]
pub struct Batch {
    pub questions: TokenBatch,
    /// `[b, num_entities]` topic indicators.
    pub seeds: Tensor,
    /// `[b, num_entities]` answer indicators.
    pub answers: Tensor,
    /// Gold answers per example, for hit-based metrics.
    pub answer_ids: Vec<Vec<u32>>,
}

#[derive(Debug, Clone, Default)]
pub struct QaDataset {
    examples: Vec<QaExample>,
    num_entities: usize,
}

impl QaDataset {
    /// Validate examples against the entity count and the word embedding
    /// table size.
    pub fn new(examples: Vec<QaExample>, num_entities: usize, num_words: usize) -> DataResult<Self> {
        for (index, ex) in examples.iter().enumerate() {
            if ex.topics.is_empty() {
                return Err(DataError::NoTopic { index });
            }
            if let Some(&token) = ex.question.iter().find(|&&t| t as usize >= num_words) {
                return Err(DataError::TokenOutOfRange {
                    index,
                    token,
                    num_words,
                });
            }
            if let Some(&entity) = ex
                .topics
                .iter()
                .chain(&ex.answers)
                .find(|&&e| e as usize >= num_entities)
            {
                return Err(DataError::EntityOutOfRange {
                    index,
                    entity,
                    num_entities,
                });
            }
        }
        Ok(Self {
            examples,
            num_entities,
        })
    }

    pub fn load(path: &Path, num_entities: usize, num_words: usize) -> DataResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| DataError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let examples: Vec<QaExample> =
            serde_json::from_str(&content).map_err(|e| DataError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        let dataset = Self::new(examples, num_entities, num_words)?;
        tracing::info!(
            path = %path.display(),
            examples = dataset.len(),
            "loaded dataset"
        );
        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn examples(&self) -> &[QaExample] {
        &self.examples
    }

    /// Batch the examples at `indices`.
    pub fn batch(&self, indices: &[usize], device: &Device) -> DataResult<Batch> {
        let rows: Vec<&[u32]> = indices
            .iter()
            .map(|&i| self.examples[i].question.as_slice())
            .collect();
        let questions = TokenBatch::from_rows(&rows);

        let topics: Vec<&[u32]> = indices
            .iter()
            .map(|&i| self.examples[i].topics.as_slice())
            .collect();
        let answer_ids: Vec<Vec<u32>> = indices
            .iter()
            .map(|&i| self.examples[i].answers.clone())
            .collect();

        Ok(Batch {
            questions,
            seeds: indicator(&topics, self.num_entities, device)?,
            answers: indicator(&answer_ids, self.num_entities, device)?,
            answer_ids,
        })
    }

    /// Example indices grouped into batches of at most `batch_size`,
    /// shuffled when `rng` is given. Tensors are built lazily per batch
    /// with [`QaDataset::batch`].
    pub fn batch_indices<R: Rng>(&self, batch_size: usize, rng: Option<&mut R>) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..self.examples.len()).collect();
        if let Some(rng) = rng {
            order.shuffle(rng);
        }
        order
            .chunks(batch_size.max(1))
            .map(<[usize]>::to_vec)
            .collect()
    }
}

/// Dense `[rows, num_entities]` 0/1 matrix marking the listed entities.
pub fn indicator<S: AsRef<[u32]>>(
    sets: &[S],
    num_entities: usize,
    device: &Device,
) -> candle_core::Result<Tensor> {
    let mut data = vec![0f32; sets.len() * num_entities];
    for (row, set) in sets.iter().enumerate() {
        for &e in set.as_ref() {
            data[row * num_entities + e as usize] = 1.0;
        }
    }
    Tensor::from_vec(data, (sets.len(), num_entities), device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn example(q: &[u32], topics: &[u32], answers: &[u32]) -> QaExample {
        QaExample {
            question: q.to_vec(),
            topics: topics.to_vec(),
            answers: answers.to_vec(),
        }
    }

    #[test]
    fn out_of_range_answer_is_rejected() {
        let err = QaDataset::new(vec![example(&[1], &[0], &[5])], 3, 4).unwrap_err();
        assert!(matches!(err, DataError::EntityOutOfRange { entity: 5, .. }));
    }

    #[test]
    fn question_token_outside_embedding_table_is_rejected() {
        let err = QaDataset::new(vec![example(&[1, 99], &[0], &[1])], 3, 6).unwrap_err();
        assert!(matches!(
            err,
            DataError::TokenOutOfRange {
                index: 0,
                token: 99,
                num_words: 6
            }
        ));
        assert!(QaDataset::new(vec![example(&[1, 5], &[0], &[1])], 3, 6).is_ok());
    }

    #[test]
    fn missing_topic_is_rejected() {
        let err = QaDataset::new(vec![example(&[1], &[], &[0])], 3, 4).unwrap_err();
        assert!(matches!(err, DataError::NoTopic { index: 0 }));
    }

    #[test]
    fn batch_builds_indicator_tensors() {
        let ds = QaDataset::new(
            vec![example(&[1, 2, 3], &[0], &[2]), example(&[4], &[1], &[0, 2])],
            3,
            5,
        )
        .unwrap();
        let batch = ds.batch(&[0, 1], &Device::Cpu).unwrap();
        assert_eq!(batch.questions.width(), 3);
        assert_eq!(
            batch.seeds.to_vec2::<f32>().unwrap(),
            vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]
        );
        assert_eq!(
            batch.answers.to_vec2::<f32>().unwrap(),
            vec![vec![0.0, 0.0, 1.0], vec![1.0, 0.0, 1.0]]
        );
        assert_eq!(batch.answer_ids[1], vec![0, 2]);
    }

    #[test]
    fn batches_cover_every_example_once() {
        let examples: Vec<QaExample> = (0..10).map(|i| example(&[i + 1], &[i % 4], &[])).collect();
        let ds = QaDataset::new(examples, 4, 11).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let groups = ds.batch_indices(3, Some(&mut rng));
        assert_eq!(groups.len(), 4);
        let mut tokens = Vec::new();
        for group in &groups {
            let batch = ds.batch(group, &Device::Cpu).unwrap();
            tokens.extend((0..batch.questions.rows()).map(|r| batch.questions.row(r)[0]));
        }
        tokens.sort_unstable();
        assert_eq!(tokens, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn dataset_loads_from_json() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("train.json");
        std::fs::write(
            &path,
            r#"[{"question": [1, 2], "topics": [0], "answers": [1]}]"#,
        )
        .unwrap();
        let ds = QaDataset::load(&path, 2, 3).unwrap();
        assert_eq!(ds.len(), 1);
        assert_eq!(ds.examples()[0].answers, vec![1]);
    }
}
