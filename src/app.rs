use std::path::PathBuf;

use clap::{
    Parser, Subcommand,
    builder::{Styles, styling},
};

use crate::{
    config::TreesimConfig,
    corpus::{self, Corpus, DEFAULT_THRESHOLD},
    logger::init_logger,
    prelude::*,
};

fn create_styles() -> Styles {
    styling::Styles::styled()
        .header(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .usage(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .literal(styling::AnsiColor::Cyan.on_default() | styling::Effects::BOLD)
        .placeholder(styling::AnsiColor::Cyan.on_default())
}

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Cluster sandboxed malware runs into families by process-tree similarity",
    styles = create_styles()
)]
pub struct Cli {
    /// Minimum similarity for two runs to count as the same family
    #[arg(long, env = "TREESIM_THRESHOLD", global = true)]
    pub threshold: Option<f64>,

    /// Ignore runs whose process tree has fewer nodes than this
    #[arg(long, global = true)]
    pub min_nodes: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Group every run in a corpus directory into family clusters and report
    /// per-group and total coverage
    Cluster {
        /// Directory of sandbox report JSON files
        dir: PathBuf,
    },
    /// Report how much of the corpus one profile covers
    Evaluate {
        /// Directory of sandbox report JSON files
        dir: PathBuf,
        /// Run UUID or file stem of the profile
        profile: String,
    },
    /// Score exactly two runs against each other
    Compare {
        /// Directory of sandbox report JSON files
        dir: PathBuf,
        /// Run UUID or file stem of the profile
        profile: String,
        /// Run UUID or file stem of the candidate
        candidate: String,
    },
    /// Pretty-print the process tree of one run
    Show {
        /// Directory of sandbox report JSON files
        dir: PathBuf,
        /// Run UUID or file stem of the run
        id: String,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logger()?;
    debug!("treesim v{}", crate::VERSION);

    let config = TreesimConfig::load()?;
    let threshold = cli
        .threshold
        .or(config.threshold)
        .unwrap_or(DEFAULT_THRESHOLD);
    let min_nodes = cli.min_nodes.or(config.min_nodes).unwrap_or(1);
    if !(0.0..=1.0).contains(&threshold) {
        bail!("--threshold must be within [0, 1], got {threshold}");
    }
    debug!("threshold: {threshold}, min nodes: {min_nodes}");

    match cli.command {
        Commands::Cluster { dir } => {
            let corpus = Corpus::load(&dir, min_nodes)?;
            corpus::cluster(&corpus, threshold)
        }
        Commands::Evaluate { dir, profile } => {
            let corpus = Corpus::load(&dir, min_nodes)?;
            corpus::evaluate(&corpus, &profile, threshold)
        }
        Commands::Compare {
            dir,
            profile,
            candidate,
        } => {
            let corpus = Corpus::load(&dir, min_nodes)?;
            corpus::compare_two(&corpus, &profile, &candidate).map(|_| ())
        }
        Commands::Show { dir, id } => {
            let corpus = Corpus::load(&dir, min_nodes)?;
            corpus::show(&corpus, &id)
        }
    }
}
