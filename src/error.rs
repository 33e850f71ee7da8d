//! Rich diagnostic error types for transfer-net.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so users know exactly what
//! went wrong and how to fix it.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for transfer-net.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum TransferError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Kb(#[from] KbError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Vocab(#[from] VocabError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Train(#[from] TrainError),
}

// ---------------------------------------------------------------------------
// Knowledge base errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum KbError {
    #[error("I/O error on knowledge base file {path}")]
    #[diagnostic(
        code(transfer::kb::io),
        help("Check that the knowledge base file exists and is readable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid knowledge base file {path}: {message}")]
    #[diagnostic(
        code(transfer::kb::format),
        help(
            "The file header does not match the transfer-net knowledge base format. \
             Rebuild the bundle with `KnowledgeBase::save`."
        )
    )]
    Format { path: String, message: String },

    #[error("knowledge base serialization error: {message}")]
    #[diagnostic(
        code(transfer::kb::serde),
        help("The bundle payload could not be encoded or decoded. Rebuild the bundle.")
    )]
    Serialization { message: String },

    #[error("range index has {ranges} entries but the knowledge base declares {entities} entities")]
    #[diagnostic(
        code(transfer::kb::range_count),
        help("The range index needs exactly one (start, end) pair per entity.")
    )]
    RangeCount { entities: usize, ranges: usize },

    #[error("range [{start}, {end}) of entity {entity} is outside the edge table of {edges} edges")]
    #[diagnostic(
        code(transfer::kb::range_bounds),
        help("Every range must satisfy start <= end <= number of edges.")
    )]
    RangeBounds {
        entity: usize,
        start: usize,
        end: usize,
        edges: usize,
    },

    #[error("edge {edge} lies in the range of entity {expected} but has subject {actual}")]
    #[diagnostic(
        code(transfer::kb::subject_mismatch),
        help("Edges must be grouped so each entity's range only holds its own outgoing edges.")
    )]
    SubjectMismatch {
        edge: usize,
        expected: usize,
        actual: usize,
    },

    #[error("edge {edge} references entity {entity}, but only {num_entities} entities exist")]
    #[diagnostic(
        code(transfer::kb::entity_out_of_range),
        help("Entity IDs are dense integers in [0, num_entities).")
    )]
    EntityOutOfRange {
        edge: usize,
        entity: usize,
        num_entities: usize,
    },

    #[error("description table holds {actual} tokens, expected {expected}")]
    #[diagnostic(
        code(transfer::kb::description_shape),
        help("The description table must hold num_edges x desc_width token IDs.")
    )]
    DescriptionShape { expected: usize, actual: usize },
}

// ---------------------------------------------------------------------------
// Vocabulary errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum VocabError {
    #[error("failed to read vocabulary: {path}")]
    #[diagnostic(
        code(transfer::vocab::read),
        help("Ensure the vocabulary JSON file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse vocabulary {path}: {message}")]
    #[diagnostic(
        code(transfer::vocab::parse),
        help("The vocabulary must be a JSON object with `word2id` and `entity2id` maps.")
    )]
    Parse { path: String, message: String },

    #[error("word \"{word}\" uses the reserved padding id 0")]
    #[diagnostic(
        code(transfer::vocab::reserved_pad),
        help("Token id 0 is reserved for padding; only `<PAD>` may map to it.")
    )]
    ReservedPad { word: String },

    #[error("unknown entity: \"{name}\"")]
    #[diagnostic(
        code(transfer::vocab::unknown_entity),
        help("Check the spelling, or look the entity up in the `entity2id` map.")
    )]
    UnknownEntity { name: String },

    #[error("vocabulary covers {vocab} entities but the knowledge base has {kb}")]
    #[diagnostic(
        code(transfer::vocab::entity_count),
        help("The vocabulary and knowledge base must come from the same preprocessing run.")
    )]
    EntityCount { vocab: usize, kb: usize },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(transfer::config::read),
        help("Ensure the config file exists and is valid TOML.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    #[diagnostic(
        code(transfer::config::parse),
        help("Check the TOML syntax of the config file.")
    )]
    Parse { path: String, message: String },

    #[error("failed to serialize config for {path}: {message}")]
    #[diagnostic(
        code(transfer::config::serialize),
        help("The configuration could not be encoded as TOML.")
    )]
    Serialize { path: String, message: String },

    #[error("failed to write config: {path}")]
    #[diagnostic(
        code(transfer::config::write),
        help("Ensure you have write permissions to the target directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(transfer::config::invalid),
        help("Fix the offending value in the [model] or [train] section.")
    )]
    Invalid { message: String },
}

// ---------------------------------------------------------------------------
// Model errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ModelError {
    #[error("tensor operation failed: {source}")]
    #[diagnostic(
        code(transfer::model::tensor),
        help("A candle tensor operation failed; this usually means a shape or dtype mismatch.")
    )]
    Tensor {
        #[from]
        source: candle_core::Error,
    },

    #[error("question batch has {questions} rows but seed scores have {seeds}")]
    #[diagnostic(
        code(transfer::model::batch_mismatch),
        help("Questions, seed scores and answers must share the batch dimension.")
    )]
    BatchMismatch { questions: usize, seeds: usize },

    #[error("score vectors have width {actual}, expected {expected} entities")]
    #[diagnostic(
        code(transfer::model::entity_count),
        help("Seed and answer vectors must have one column per knowledge base entity.")
    )]
    EntityCount { expected: usize, actual: usize },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Dataset errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum DataError {
    #[error("failed to read dataset: {path}")]
    #[diagnostic(
        code(transfer::data::read),
        help("Ensure the dataset file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse dataset {path}: {message}")]
    #[diagnostic(
        code(transfer::data::parse),
        help("A dataset is a JSON array of objects with question, topics and answers fields.")
    )]
    Parse { path: String, message: String },

    #[error("example {index} references entity {entity}, but only {num_entities} entities exist")]
    #[diagnostic(
        code(transfer::data::entity_out_of_range),
        help("Re-encode the dataset with the vocabulary the knowledge base was built from.")
    )]
    EntityOutOfRange {
        index: usize,
        entity: u32,
        num_entities: usize,
    },

    #[error("example {index} uses token {token}, but the embedding table has only {num_words} words")]
    #[diagnostic(
        code(transfer::data::token_out_of_range),
        help("Re-tokenize the dataset with the vocabulary the model is built with.")
    )]
    TokenOutOfRange {
        index: usize,
        token: u32,
        num_words: usize,
    },

    #[error("example {index} has no topic entity")]
    #[diagnostic(
        code(transfer::data::no_topic),
        help("Every question needs at least one topic entity to seed reasoning.")
    )]
    NoTopic { index: usize },

    #[error("tensor construction failed: {source}")]
    #[diagnostic(code(transfer::data::tensor))]
    Tensor {
        #[from]
        source: candle_core::Error,
    },
}

// ---------------------------------------------------------------------------
// Training errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum TrainError {
    #[error("dataset is empty")]
    #[diagnostic(
        code(transfer::train::empty),
        help("Provide at least one example to train or evaluate on.")
    )]
    EmptyDataset,

    #[error("checkpoint error at {path}: {message}")]
    #[diagnostic(
        code(transfer::train::checkpoint),
        help(
            "The checkpoint could not be written or read. Check the path, and make sure \
             it was produced with the same model configuration."
        )
    )]
    Checkpoint { path: String, message: String },

    #[error("optimizer step failed: {source}")]
    #[diagnostic(code(transfer::train::optimizer))]
    Tensor {
        #[from]
        source: candle_core::Error,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Data(#[from] DataError),
}

/// Convenience result type for crate-level operations.
pub type TransferResult<T> = std::result::Result<T, TransferError>;
