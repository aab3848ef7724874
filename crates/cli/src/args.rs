//! Command line arguments

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "medqa", version, about = "Vietnamese medical retrieval and question answering")]
pub struct Args {
    /// Config overlay loaded on top of `default` (e.g. `production`)
    #[arg(long, global = true, env = "MEDQA_ENV")]
    pub env: Option<String>,

    /// Directory holding the config files
    #[arg(long, global = true, default_value = "config")]
    pub config_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build a BM25 snapshot from a corpus
    Index {
        /// Corpus file or directory (JSON, JSON Lines, YAML)
        #[arg(long)]
        corpus: PathBuf,
        /// Snapshot path; defaults to `bm25.index_path`
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        k1: Option<f64>,
        #[arg(long)]
        b: Option<f64>,
    },

    /// Add documents to an existing snapshot; already indexed ids are skipped
    Add {
        #[arg(long)]
        corpus: PathBuf,
        /// Snapshot to extend and rewrite; defaults to `bm25.index_path`
        #[arg(long)]
        index: Option<PathBuf>,
    },

    /// Embed a corpus and upsert it into the vector index
    Upload {
        #[arg(long)]
        corpus: PathBuf,
        #[arg(long, default_value_t = 64)]
        batch_size: usize,
    },

    /// Print ranked candidates for a query
    Query {
        text: String,
        #[arg(long, short = 'n')]
        limit: Option<usize>,
        #[arg(long, value_enum, default_value_t = Mode::Hybrid)]
        mode: Mode,
        /// Serve documents and vectors from this corpus instead of Qdrant
        #[arg(long)]
        corpus: Option<PathBuf>,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Answer one question with the full pipeline
    Ask {
        question: String,
        /// Serve documents and vectors from this corpus instead of Qdrant
        #[arg(long)]
        corpus: Option<PathBuf>,
        /// Also print the evidence used
        #[arg(long)]
        show_evidence: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Lexical,
    Dense,
    Hybrid,
    Mmr,
}
