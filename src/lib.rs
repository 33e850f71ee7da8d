// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # transfer-net
//!
//! Differentiable multi-hop question answering over a knowledge base. Entity
//! scores start at the question's topic entities and are moved along edges
//! whose text descriptions match a per-hop attention over the question.
//!
//! ## Architecture
//!
//! - **Knowledge base** (`kb`): subject-sorted edge list with per-entity ranges, mmap-loaded
//! - **Encoders** (`encoder`): shared word embeddings and bidirectional GRU sequence encoders
//! - **Reasoning** (`reason`): frontier pruning, edge scoring and score transfer per hop
//! - **Answer gate** (`answer`): question-conditioned per-entity gate and weighted loss
//! - **Training** (`train`, `data`): mini-batching, AdamW and safetensors checkpoints
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use candle_core::Device;
//! use transfer_net::config::ModelConfig;
//! use transfer_net::data::indicator;
//! use transfer_net::kb::{EdgeRecord, KnowledgeBase};
//! use transfer_net::train::build_model;
//! use transfer_net::vocab::TokenBatch;
//!
//! let kb = KnowledgeBase::build(3, 2, vec![
//!     EdgeRecord::new(0, 1, vec![1, 2]),
//!     EdgeRecord::new(1, 2, vec![3]),
//! ]).unwrap();
//! let (_varmap, model) =
//!     build_model(ModelConfig::default(), Arc::new(kb), 10, &Device::Cpu).unwrap();
//! let questions = TokenBatch::from_rows(&[vec![4, 5, 6]]);
//! let seeds = indicator(&[[0u32]], 3, &Device::Cpu).unwrap();
//! let out = model.infer(&questions, &seeds).unwrap();
//! println!("{}", out.scores);
//! ```

pub mod answer;
pub mod config;
pub mod data;
pub mod encoder;
pub mod error;
pub mod kb;
pub mod reason;
pub mod train;
pub mod vocab;
