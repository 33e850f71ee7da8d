//! transfer-net CLI: train and query the multi-hop reasoner.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use candle_core::Device;
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use transfer_net::config::RunConfig;
use transfer_net::data::{QaDataset, indicator};
use transfer_net::kb::KnowledgeBase;
use transfer_net::reason::top_entities;
use transfer_net::train::{Trainer, evaluate, load_model};
use transfer_net::vocab::{TokenBatch, Vocabulary};

#[derive(Parser)]
#[command(name = "transfer-net", version, about = "Multi-hop knowledge base question answering")]
struct Cli {
    /// Knowledge base bundle written by `KnowledgeBase::save`.
    #[arg(long, global = true, default_value = "kb.bin")]
    kb: PathBuf,

    /// Vocabulary JSON with `word2id` and `entity2id`.
    #[arg(long, global = true, default_value = "vocab.json")]
    vocab: PathBuf,

    /// Run configuration (TOML). Defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show knowledge base statistics.
    KbInfo,

    /// Train a model and write a checkpoint.
    Train {
        /// Training set (JSON).
        #[arg(long)]
        train: PathBuf,

        /// Optional validation set (JSON).
        #[arg(long)]
        valid: Option<PathBuf>,

        /// Output checkpoint path.
        #[arg(long, default_value = "model.safetensors")]
        out: PathBuf,
    },

    /// Report hits@1 of a checkpoint on a dataset.
    Eval {
        #[arg(long)]
        data: PathBuf,

        #[arg(long, default_value = "model.safetensors")]
        checkpoint: PathBuf,
    },

    /// Answer a single question from a topic entity.
    Ask {
        /// Topic entity name.
        #[arg(long)]
        topic: String,

        /// The question text.
        question: String,

        #[arg(long, default_value = "model.safetensors")]
        checkpoint: PathBuf,

        /// Number of answers to print.
        #[arg(long, default_value = "5")]
        top_k: usize,

        /// Padded question width.
        #[arg(long, default_value = "32", value_parser = clap::value_parser!(u32).range(1..))]
        width: u32,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let run = match &cli.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    let device = Device::Cpu;
    let kb = Arc::new(KnowledgeBase::load(&cli.kb)?);

    match cli.command {
        Commands::KbInfo => {
            let isolated = (0..kb.num_entities())
                .filter(|&e| kb.out_degree(e) == 0)
                .count();
            let max_degree = (0..kb.num_entities())
                .map(|e| kb.out_degree(e))
                .max()
                .unwrap_or(0);
            println!("Knowledge base: {}", cli.kb.display());
            println!("  entities:          {}", kb.num_entities());
            println!("  edges:             {}", kb.num_edges());
            println!("  description width: {}", kb.desc_width());
            println!("  dead-end entities: {isolated}");
            println!("  max out-degree:    {max_degree}");
        }

        Commands::Train { train, valid, out } => {
            let vocab = load_vocab(&cli.vocab, &kb)?;
            let train_set = QaDataset::load(&train, kb.num_entities(), vocab.num_words())?;
            let valid_set = valid
                .map(|p| QaDataset::load(&p, kb.num_entities(), vocab.num_words()))
                .transpose()?;

            let mut trainer = Trainer::new(
                run.model.clone(),
                run.train.clone(),
                kb.clone(),
                vocab.num_words(),
                &device,
            )?;
            let reports = trainer.fit(&train_set, valid_set.as_ref())?;
            trainer.save_checkpoint(&out)?;

            if let Some(last) = reports.last() {
                println!(
                    "Trained {} epochs, final loss {:.5}",
                    last.epoch, last.mean_loss
                );
                if let Some(hits) = last.hits_at_1 {
                    println!("Validation hits@1: {:.4}", hits);
                }
            }
            println!("Checkpoint written to {}", out.display());
        }

        Commands::Eval { data, checkpoint } => {
            let vocab = load_vocab(&cli.vocab, &kb)?;
            let dataset = QaDataset::load(&data, kb.num_entities(), vocab.num_words())?;
            let (_varmap, model) = load_model(
                run.model.clone(),
                kb.clone(),
                vocab.num_words(),
                &checkpoint,
                &device,
            )?;
            let eval = evaluate(&model, &dataset, run.train.batch_size)?;
            println!(
                "hits@1: {:.4} ({}/{})",
                eval.hits_at_1(),
                eval.hits,
                eval.examples
            );
        }

        Commands::Ask {
            topic,
            question,
            checkpoint,
            top_k,
            width,
        } => {
            let vocab = load_vocab(&cli.vocab, &kb)?;
            let topic_id = vocab.entity_id(&topic)?;
            let (_varmap, model) = load_model(
                run.model.clone(),
                kb.clone(),
                vocab.num_words(),
                &checkpoint,
                &device,
            )?;

            let tokens = vocab.encode_question(&question, width as usize);
            let questions = TokenBatch::from_rows(&[tokens.clone()]);
            let seeds = indicator(&[[topic_id]], kb.num_entities(), &device).into_diagnostic()?;
            let out = model.infer(&questions, &seeds)?;

            for (hop, attention) in out.attentions.iter().enumerate() {
                let weights = attention.get(0).into_diagnostic()?.to_vec1::<f32>().into_diagnostic()?;
                if let Some(&(pos, w)) = top_entities(&weights, 1).first() {
                    let word = tokens
                        .get(pos as usize)
                        .and_then(|&id| vocab.word(id))
                        .unwrap_or("<PAD>");
                    println!("hop {}: attends to \"{}\" ({:.3})", hop + 1, word, w);
                }
            }

            let scores = out.scores.get(0).into_diagnostic()?.to_vec1::<f32>().into_diagnostic()?;
            println!("Answers (top {top_k}):");
            for (rank, (entity, score)) in top_entities(&scores, top_k).into_iter().enumerate() {
                println!(
                    "  {}. \"{}\" / {} (score: {:.4})",
                    rank + 1,
                    vocab.entity_name(entity),
                    entity,
                    score
                );
            }
        }
    }

    Ok(())
}

/// Load the vocabulary and make sure it indexes the same entities as `kb`.
fn load_vocab(path: &Path, kb: &KnowledgeBase) -> Result<Vocabulary> {
    let vocab = Vocabulary::load(path)?;
    vocab.check_against(kb)?;
    Ok(vocab)
}
