use std::fs;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use pedigree_kinship_core as core;
use core::kinship::{
    calculate_kinship_with_reporter, LogReporter, NoopReporter, ProgressReporter,
};
use core::pedigree::ParseOptions;
use core::types::{Vertex, VertexSet};
use core::{Backend, Pedigree};

#[derive(Parser)]
#[command(name = "kinship")]
#[command(version)]
#[command(about = "Sparse kinship matrices over large pedigrees")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    /// One individual per line: `child parent1 parent2`
    Text,
    /// CSV with an `animal,sire,dam` header
    Csv,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    /// Flat hash maps: fastest, larger working set
    Time,
    /// Ordered maps: smaller working set, slower lookups
    Memory,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Time => Backend::TimeOptimised,
            BackendArg::Memory => Backend::MemoryOptimised,
        }
    }
}

#[derive(Args)]
struct PedigreeArgs {
    /// Path to the pedigree file
    #[arg(short, long)]
    pedigree: String,

    /// Pedigree file format
    #[arg(long, value_enum, default_value_t = FormatArg::Text)]
    format: FormatArg,

    /// Column separator for the text format
    #[arg(long, default_value_t = ' ')]
    separator: char,

    /// Token denoting a missing parent in the text format (repeatable)
    #[arg(long = "missing", default_values_t = [String::from("-1"), String::from(".")])]
    missing_parent: Vec<String>,

    /// Skip the first line of the pedigree file
    #[arg(long)]
    skip_first_line: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute proband-to-proband kinship coefficients
    Compute {
        #[command(flatten)]
        pedigree: PedigreeArgs,

        /// File with one proband id per line (default: all childless
        /// individuals)
        #[arg(long)]
        probands: Option<String>,

        /// Storage backend
        #[arg(long, value_enum, default_value_t = BackendArg::Time)]
        backend: BackendArg,

        /// Output CSV path
        #[arg(short, long)]
        output: String,

        /// Log a progress line every N batches (0 disables)
        #[arg(long, default_value_t = 0)]
        progress_every: usize,
    },

    /// Parse and validate a pedigree file
    Validate {
        #[command(flatten)]
        pedigree: PedigreeArgs,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Compute {
            pedigree,
            probands,
            backend,
            output,
            progress_every,
        } => cmd_compute(
            &pedigree,
            probands.as_deref(),
            backend.into(),
            &output,
            progress_every,
        ),
        Commands::Validate { pedigree } => cmd_validate(&pedigree),
    }
}

fn load_pedigree(args: &PedigreeArgs) -> Result<Pedigree> {
    let pedigree = match args.format {
        FormatArg::Text => {
            let options = ParseOptions {
                separator: args.separator,
                missing_parent: args.missing_parent.clone(),
                skip_first_line: args.skip_first_line,
            };
            Pedigree::from_file(&args.pedigree, &options)
        }
        FormatArg::Csv => Pedigree::from_csv(&args.pedigree),
    };
    pedigree.with_context(|| format!("Failed to load pedigree from '{}'", args.pedigree))
}

/// Read one proband id per line; empty lines and `#` comments are skipped.
fn read_probands(path: &str) -> Result<VertexSet> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read proband list from '{path}'"))?;
    let mut probands = VertexSet::new();
    for (index, line) in content.lines().enumerate() {
        let token = line.trim();
        if token.is_empty() || token.starts_with('#') {
            continue;
        }
        let id: Vertex = token.parse().with_context(|| {
            format!("Invalid proband id '{token}' on line {} of '{path}'", index + 1)
        })?;
        probands.insert(id);
    }
    Ok(probands)
}

fn cmd_compute(
    args: &PedigreeArgs,
    probands_path: Option<&str>,
    backend: Backend,
    output: &str,
    progress_every: usize,
) -> Result<()> {
    let mut pedigree = load_pedigree(args)?;
    eprintln!(
        "Loaded {} individuals ({} founders) from '{}'",
        pedigree.len(),
        pedigree.founders().len(),
        args.pedigree
    );

    let sinks = match probands_path {
        Some(path) => {
            let probands = read_probands(path)?;
            pedigree
                .reduce_to_ascending(&probands)
                .context("Failed to restrict the pedigree to the probands' ancestors")?;
            eprintln!(
                "Restricted to the ascending genealogy of {} probands ({} individuals)",
                probands.len(),
                pedigree.len()
            );
            probands
        }
        None => pedigree.sinks(),
    };

    let mut reporter: Box<dyn ProgressReporter> = if progress_every > 0 {
        Box::new(LogReporter::new(progress_every))
    } else {
        Box::new(NoopReporter)
    };
    let matrix = calculate_kinship_with_reporter(
        pedigree.children_map(),
        pedigree.parents_map(),
        &sinks,
        backend,
        reporter.as_mut(),
    )
    .context("Kinship computation failed")?;

    let mut ids: Vec<Vertex> = matrix.iter_sinks().collect();
    ids.sort_unstable();

    let mut writer = csv::Writer::from_path(output)
        .with_context(|| format!("Failed to open output file '{output}'"))?;
    writer.write_record(["Proband_1_id", "Proband_2_id", "Kinship"])?;
    let mut pairs = 0usize;
    for (index, &first) in ids.iter().enumerate() {
        for &second in &ids[index..] {
            let value = matrix.get(first, second)?;
            writer.write_record([
                first.to_string(),
                second.to_string(),
                value.to_string(),
            ])?;
            pairs += 1;
        }
    }
    writer.flush()?;

    eprintln!(
        "Wrote {} kinship pairs for {} probands to '{}' (peak cut size: {} rows)",
        pairs,
        ids.len(),
        output,
        matrix.peak_residents()
    );
    Ok(())
}

fn cmd_validate(args: &PedigreeArgs) -> Result<()> {
    let pedigree = load_pedigree(args)?;
    pedigree
        .validate()
        .context("Pedigree failed validation")?;
    println!(
        "Pedigree OK: {} individuals, {} founders, {} sinks",
        pedigree.len(),
        pedigree.founders().len(),
        pedigree.sinks().len()
    );
    Ok(())
}
