//! Memory-resident knowledge base store.
//!
//! Three aligned arrays describe the graph:
//!
//! - `pairs`: the edge table of `(subject, object)` pairs, grouped by subject
//! - `ranges`: per entity, the half-open `[start, end)` slice of its outgoing edges
//! - `descriptions`: per edge, a fixed-width padded token sequence naming the relation
//!
//! The store is immutable after construction and shared read-only by every
//! example and hop. On disk it is a small header followed by a bincode payload,
//! read back through a read-only memory map.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::Path;

use memmap2::Mmap;
use serde::{Deserialize, Serialize};

use crate::error::KbError;
use crate::vocab::{PAD_ID, TokenBatch};

pub type KbResult<T> = std::result::Result<T, KbError>;

const HEADER_MAGIC: &[u8; 8] = b"TNETKB\0\0";
const HEADER_VERSION: u32 = 1;
const HEADER_SIZE: usize = 16;

/// One edge fed to [`KnowledgeBase::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRecord {
    pub subject: u32,
    pub object: u32,
    pub description: Vec<u32>,
}

impl EdgeRecord {
    pub fn new(subject: u32, object: u32, description: Vec<u32>) -> Self {
        Self {
            subject,
            object,
            description,
        }
    }
}

/// Immutable edge table with per-entity range index and edge descriptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pairs: Vec<(u32, u32)>,
    ranges: Vec<(u32, u32)>,
    descriptions: Vec<u32>,
    desc_width: usize,
}

impl KnowledgeBase {
    /// Assemble a store from pre-built arrays, checking every invariant.
    pub fn from_parts(
        pairs: Vec<(u32, u32)>,
        ranges: Vec<(u32, u32)>,
        descriptions: Vec<u32>,
        desc_width: usize,
    ) -> KbResult<Self> {
        let kb = Self {
            pairs,
            ranges,
            descriptions,
            desc_width,
        };
        kb.validate()?;
        Ok(kb)
    }

    /// Group edge records by subject (stable) and build the three arrays.
    ///
    /// Descriptions are truncated or padded with [`PAD_ID`] to `desc_width`.
    pub fn build(
        num_entities: usize,
        desc_width: usize,
        edges: impl IntoIterator<Item = EdgeRecord>,
    ) -> KbResult<Self> {
        let mut edges: Vec<EdgeRecord> = edges.into_iter().collect();
        for (i, e) in edges.iter().enumerate() {
            for entity in [e.subject, e.object] {
                if entity as usize >= num_entities {
                    return Err(KbError::EntityOutOfRange {
                        edge: i,
                        entity: entity as usize,
                        num_entities,
                    });
                }
            }
        }
        edges.sort_by_key(|e| e.subject);

        let mut ranges = vec![(0u32, 0u32); num_entities];
        let mut pairs = Vec::with_capacity(edges.len());
        let mut descriptions = Vec::with_capacity(edges.len() * desc_width);
        for (i, e) in edges.iter().enumerate() {
            let slot = &mut ranges[e.subject as usize];
            if slot.0 == slot.1 {
                slot.0 = i as u32;
            }
            slot.1 = i as u32 + 1;
            pairs.push((e.subject, e.object));
            let take = e.description.len().min(desc_width);
            descriptions.extend_from_slice(&e.description[..take]);
            descriptions.extend(std::iter::repeat(PAD_ID).take(desc_width - take));
        }

        Self::from_parts(pairs, ranges, descriptions, desc_width)
    }

    fn validate(&self) -> KbResult<()> {
        let num_entities = self.ranges.len();
        let num_edges = self.pairs.len();

        let expected = num_edges * self.desc_width;
        if self.descriptions.len() != expected {
            return Err(KbError::DescriptionShape {
                expected,
                actual: self.descriptions.len(),
            });
        }

        for (entity, &(start, end)) in self.ranges.iter().enumerate() {
            let (start, end) = (start as usize, end as usize);
            if start > end || end > num_edges {
                return Err(KbError::RangeBounds {
                    entity,
                    start,
                    end,
                    edges: num_edges,
                });
            }
            for edge in start..end {
                let subject = self.pairs[edge].0 as usize;
                if subject != entity {
                    return Err(KbError::SubjectMismatch {
                        edge,
                        expected: entity,
                        actual: subject,
                    });
                }
            }
        }

        for (edge, &(subject, object)) in self.pairs.iter().enumerate() {
            for entity in [subject as usize, object as usize] {
                if entity >= num_entities {
                    return Err(KbError::EntityOutOfRange {
                        edge,
                        entity,
                        num_entities,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn num_entities(&self) -> usize {
        self.ranges.len()
    }

    pub fn num_edges(&self) -> usize {
        self.pairs.len()
    }

    pub fn desc_width(&self) -> usize {
        self.desc_width
    }

    /// Edge-table slice holding `entity`'s outgoing edges.
    ///
    /// Panics if `entity` is out of range.
    pub fn range(&self, entity: usize) -> Range<usize> {
        let (start, end) = self.ranges[entity];
        start as usize..end as usize
    }

    pub fn out_degree(&self, entity: usize) -> usize {
        self.range(entity).len()
    }

    pub fn pair(&self, edge: usize) -> (u32, u32) {
        self.pairs[edge]
    }

    pub fn description(&self, edge: usize) -> &[u32] {
        &self.descriptions[edge * self.desc_width..(edge + 1) * self.desc_width]
    }

    /// Split the given edges into parallel subject and object id lists.
    pub fn endpoints(&self, edges: &[usize]) -> (Vec<u32>, Vec<u32>) {
        edges.iter().map(|&e| self.pairs[e]).unzip()
    }

    /// Descriptions of the given edges as one padded batch.
    pub fn descriptions(&self, edges: &[usize]) -> TokenBatch {
        let mut ids = Vec::with_capacity(edges.len() * self.desc_width);
        for &e in edges {
            ids.extend_from_slice(self.description(e));
        }
        TokenBatch::from_padded(ids, edges.len(), self.desc_width)
    }

    /// Write the store as header + bincode payload.
    pub fn save(&self, path: &Path) -> KbResult<()> {
        let io_err = |e| KbError::Io {
            path: path.display().to_string(),
            source: e,
        };
        let file = File::create(path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);

        let mut header = [0u8; HEADER_SIZE];
        header[..8].copy_from_slice(HEADER_MAGIC);
        header[8..12].copy_from_slice(&HEADER_VERSION.to_le_bytes());
        writer.write_all(&header).map_err(io_err)?;

        bincode::serialize_into(&mut writer, self).map_err(|e| KbError::Serialization {
            message: e.to_string(),
        })?;
        writer.flush().map_err(io_err)
    }

    /// Map a saved store read-only, decode it and re-check its invariants.
    pub fn load(path: &Path) -> KbResult<Self> {
        let file = File::open(path).map_err(|e| KbError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        // Safety: the mapping is read-only and dropped before this function returns.
        let mmap = unsafe {
            Mmap::map(&file).map_err(|e| KbError::Io {
                path: path.display().to_string(),
                source: e,
            })?
        };

        let format_err = |message: String| KbError::Format {
            path: path.display().to_string(),
            message,
        };
        if mmap.len() < HEADER_SIZE || &mmap[..8] != HEADER_MAGIC {
            return Err(format_err("missing knowledge base header".into()));
        }
        let version = u32::from_le_bytes([mmap[8], mmap[9], mmap[10], mmap[11]]);
        if version != HEADER_VERSION {
            return Err(format_err(format!(
                "version {version} != expected {HEADER_VERSION}"
            )));
        }

        let kb: Self =
            bincode::deserialize(&mmap[HEADER_SIZE..]).map_err(|e| KbError::Serialization {
                message: e.to_string(),
            })?;
        kb.validate()?;

        tracing::info!(
            entities = kb.num_entities(),
            edges = kb.num_edges(),
            desc_width = kb.desc_width,
            "loaded knowledge base"
        );
        Ok(kb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// 0 -> 1 (tokens 3), 0 -> 2 (tokens 4 5), 1 -> 2 (tokens 6); entity 2 is a dead end.
    fn small_kb() -> KnowledgeBase {
        KnowledgeBase::build(
            3,
            2,
            vec![
                EdgeRecord::new(1, 2, vec![6]),
                EdgeRecord::new(0, 1, vec![3]),
                EdgeRecord::new(0, 2, vec![4, 5, 9]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn build_groups_edges_by_subject() {
        let kb = small_kb();
        assert_eq!(kb.num_entities(), 3);
        assert_eq!(kb.num_edges(), 3);
        assert_eq!(kb.range(0), 0..2);
        assert_eq!(kb.range(1), 2..3);
        assert!(kb.range(2).is_empty());
        assert_eq!(kb.pair(0), (0, 1));
        assert_eq!(kb.pair(2), (1, 2));
        assert_eq!(kb.out_degree(0), 2);
    }

    #[test]
    fn descriptions_are_padded_and_truncated() {
        let kb = small_kb();
        assert_eq!(kb.description(0), &[3, 0]);
        assert_eq!(kb.description(1), &[4, 5]);
        let batch = kb.descriptions(&[2, 0]);
        assert_eq!(batch.row(0), &[6, 0]);
        assert_eq!(batch.lengths(), vec![1, 1]);
    }

    #[test]
    fn endpoints_split_pairs() {
        let kb = small_kb();
        let (subjects, objects) = kb.endpoints(&[1, 2]);
        assert_eq!(subjects, vec![0, 1]);
        assert_eq!(objects, vec![2, 2]);
    }

    #[test]
    fn range_crossing_subjects_is_rejected() {
        let err = KnowledgeBase::from_parts(
            vec![(0, 1), (1, 0)],
            vec![(0, 2), (2, 2)],
            vec![1, 1],
            1,
        )
        .unwrap_err();
        assert!(matches!(err, KbError::SubjectMismatch { edge: 1, .. }));
    }

    #[test]
    fn out_of_bounds_range_is_rejected() {
        let err = KnowledgeBase::from_parts(vec![(0, 0)], vec![(0, 5)], vec![1], 1).unwrap_err();
        assert!(matches!(err, KbError::RangeBounds { .. }));
    }

    #[test]
    fn unknown_object_is_rejected() {
        let err = KnowledgeBase::build(2, 1, vec![EdgeRecord::new(0, 7, vec![1])]).unwrap_err();
        assert!(matches!(err, KbError::EntityOutOfRange { entity: 7, .. }));
    }

    #[test]
    fn description_table_shape_is_checked() {
        let err = KnowledgeBase::from_parts(vec![(0, 0)], vec![(0, 1)], vec![1, 2, 3], 2)
            .unwrap_err();
        assert!(matches!(
            err,
            KbError::DescriptionShape {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kb.bin");
        let kb = small_kb();
        kb.save(&path).unwrap();

        let loaded = KnowledgeBase::load(&path).unwrap();
        assert_eq!(loaded.num_edges(), 3);
        assert_eq!(loaded.range(0), kb.range(0));
        assert_eq!(loaded.description(1), kb.description(1));
    }

    #[test]
    fn load_rejects_foreign_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("junk.bin");
        std::fs::write(&path, b"definitely not a knowledge base").unwrap();
        let err = KnowledgeBase::load(&path).unwrap_err();
        assert!(matches!(err, KbError::Format { .. }));
    }
}
