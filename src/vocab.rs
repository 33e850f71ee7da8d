//! Vocabularies and padded token batches.
//!
//! Token id [`PAD_ID`] is reserved for padding and never names a real word.
//! True sequence lengths are recovered by counting non-padding ids.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};

use crate::error::VocabError;
use crate::kb::KnowledgeBase;

pub type VocabResult<T> = std::result::Result<T, VocabError>;

/// Reserved padding token id.
pub const PAD_ID: u32 = 0;

/// Word for out-of-vocabulary tokens, if the vocabulary defines it.
pub const UNK_TOKEN: &str = "<UNK>";

/// Word and entity id mappings built by the preprocessing pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Vocabulary {
    pub word2id: HashMap<String, u32>,
    pub entity2id: HashMap<String, u32>,
    #[serde(skip)]
    id2entity: HashMap<u32, String>,
}

impl Vocabulary {
    /// Build from explicit maps, checking that only `<PAD>` uses id 0.
    pub fn new(
        word2id: HashMap<String, u32>,
        entity2id: HashMap<String, u32>,
    ) -> VocabResult<Self> {
        if let Some((word, _)) = word2id
            .iter()
            .find(|(w, id)| **id == PAD_ID && w.as_str() != "<PAD>")
        {
            return Err(VocabError::ReservedPad { word: word.clone() });
        }
        let id2entity = entity2id.iter().map(|(k, &v)| (v, k.clone())).collect();
        Ok(Self {
            word2id,
            entity2id,
            id2entity,
        })
    }

    /// Load a `{"word2id": {...}, "entity2id": {...}}` JSON file.
    pub fn load(path: &Path) -> VocabResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| VocabError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let raw: Vocabulary = serde_json::from_str(&content).map_err(|e| VocabError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::new(raw.word2id, raw.entity2id)
    }

    /// Size of the word embedding table (max id + 1, so sparse ids still fit).
    pub fn num_words(&self) -> usize {
        self.word2id
            .values()
            .max()
            .map_or(1, |&m| (m as usize + 1).max(self.word2id.len()))
    }

    pub fn num_entities(&self) -> usize {
        self.entity2id.len()
    }

    pub fn entity_id(&self, name: &str) -> VocabResult<u32> {
        self.entity2id
            .get(name)
            .copied()
            .ok_or_else(|| VocabError::UnknownEntity { name: name.into() })
    }

    /// Fail unless every entity id names a row of `kb`'s score vector and
    /// both sides agree on the entity count.
    pub fn check_against(&self, kb: &KnowledgeBase) -> VocabResult<()> {
        let span = self
            .entity2id
            .values()
            .max()
            .map_or(0, |&m| m as usize + 1);
        let covered = span.max(self.entity2id.len());
        if covered != kb.num_entities() {
            return Err(VocabError::EntityCount {
                vocab: covered,
                kb: kb.num_entities(),
            });
        }
        Ok(())
    }

    /// Entity name for display; falls back to the numeric id.
    pub fn entity_name(&self, id: u32) -> String {
        self.id2entity
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("#{id}"))
    }

    /// Word for a token id, if any.
    pub fn word(&self, id: u32) -> Option<&str> {
        self.word2id
            .iter()
            .find(|&(_, &v)| v == id)
            .map(|(k, _)| k.as_str())
    }

    /// Whitespace-tokenize a question into exactly `width` ids.
    ///
    /// Unknown words map to `<UNK>` when the vocabulary has it and are
    /// dropped otherwise.
    pub fn encode_question(&self, text: &str, width: usize) -> Vec<u32> {
        let unk = self.word2id.get(UNK_TOKEN).copied();
        let mut ids: Vec<u32> = text
            .split_whitespace()
            .map(|w| w.trim_end_matches('?').to_lowercase())
            .filter(|w| !w.is_empty())
            .filter_map(|w| self.word2id.get(&w).copied().or(unk))
            .take(width)
            .collect();
        ids.resize(width, PAD_ID);
        ids
    }
}

/// Row-major batch of padded token ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBatch {
    ids: Vec<u32>,
    rows: usize,
    width: usize,
}

impl TokenBatch {
    /// Pad ragged rows with [`PAD_ID`] to the longest row (at least width 1).
    pub fn from_rows<R: AsRef<[u32]>>(rows: &[R]) -> Self {
        let width = rows.iter().map(|r| r.as_ref().len()).max().unwrap_or(0).max(1);
        let mut ids = Vec::with_capacity(rows.len() * width);
        for row in rows {
            let row = row.as_ref();
            ids.extend_from_slice(row);
            ids.extend(std::iter::repeat(PAD_ID).take(width - row.len()));
        }
        Self {
            ids,
            rows: rows.len(),
            width,
        }
    }

    /// Wrap already padded ids. Panics if `ids.len() != rows * width`.
    pub fn from_padded(ids: Vec<u32>, rows: usize, width: usize) -> Self {
        assert_eq!(ids.len(), rows * width, "token batch shape mismatch");
        Self { ids, rows, width }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn row(&self, i: usize) -> &[u32] {
        &self.ids[i * self.width..(i + 1) * self.width]
    }

    /// True lengths: number of non-padding ids in each row.
    pub fn lengths(&self) -> Vec<usize> {
        (0..self.rows)
            .map(|i| self.row(i).iter().filter(|&&id| id != PAD_ID).count())
            .collect()
    }

    /// Select a subset of rows, keeping the padded width.
    pub fn select(&self, rows: &[usize]) -> Self {
        let mut ids = Vec::with_capacity(rows.len() * self.width);
        for &r in rows {
            ids.extend_from_slice(self.row(r));
        }
        Self {
            ids,
            rows: rows.len(),
            width: self.width,
        }
    }

    /// `[rows, width]` tensor of `u32` ids.
    pub fn to_tensor(&self, device: &Device) -> candle_core::Result<Tensor> {
        Tensor::from_slice(&self.ids, (self.rows, self.width), device)
    }
}
