//! Command-line interface for rust_cage_de

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rust_cage_de")]
#[command(version)]
#[command(about = "Differential transcription-start-site activity between sample groups")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full differential-activity analysis
    #[command(
        long_about = "Run the full differential-activity analysis\n\n\
            Collapses raw tag clusters through the identity map, filters lowly\n\
            expressed features, normalizes with TMM, estimates dispersions, fits\n\
            a quasi-likelihood GLM on ~0 + group + batch and tests every contrast\n\
            against a minimum fold change.",
        after_long_help = "\
Examples:
  # All pairwise group comparisons
  rust_cage_de run -c clusters.tsv -s samples.tsv -i identity.tsv -o results/

  # Explicit contrasts, including an average over groups
  rust_cage_de run -c clusters.tsv -s samples.tsv -i identity.tsv -o results/ \\
    --contrast B.vs.A --contrast \"BvsRest=B-0.5*A-0.5*C\"

  # Stricter calling policy from a JSON file, FDR overridden on the command line
  rust_cage_de run -c clusters.tsv -s samples.tsv -i identity.tsv \\
    --config analysis.json --max-fdr 0.01"
    )]
    Run {
        /// Raw cluster count table (TSV or CSV)
        #[arg(short, long,
            long_help = "Raw cluster count table.\n\
                Columns: cluster_id, optional chrom/start/end/strand, then one\n\
                integer count column per sample. Tab or comma delimited.")]
        counts: String,

        /// Sample sheet (id, group, batch, optional barcode)
        #[arg(short, long)]
        samples: String,

        /// Identity map (raw_id, optional enhancer_group, merged_id, annotation)
        #[arg(short, long)]
        identity: String,

        /// Output directory
        #[arg(short, long, default_value = "cage_de_results")]
        output: String,

        /// Contrast, e.g. `B.vs.A` or `NAME=B-0.5*A-0.5*C` (repeatable)
        #[arg(long, value_name = "CONTRAST")]
        contrast: Vec<String>,

        /// JSON configuration file
        #[arg(long)]
        config: Option<String>,

        /// Minimum log2 fold change for the TREAT test [default: 0.5]
        #[arg(long)]
        min_lfc: Option<f64>,

        /// FDR cutoff [default: 0.05]
        #[arg(long)]
        max_fdr: Option<f64>,

        /// Keep only significant rows in result tables
        #[arg(long)]
        significant_only: bool,

        /// Non-sample column of the count table to skip (repeatable)
        #[arg(long, value_name = "COLUMN")]
        metadata_column: Vec<String>,

        /// Dispersion used in the GLM fit: common, trended or tagwise
        #[arg(long, value_name = "KIND")]
        dispersion: Option<String>,

        /// Number of threads (0 = all cores)
        #[arg(short = 't', long, default_value_t = 0)]
        threads: usize,
    },

    /// Write the batch-adjusted log-CPM table only
    #[command(
        long_about = "Aggregate, filter and TMM-normalize the counts, then write\n\
            log2-CPM values with the batch effect projected out."
    )]
    Normalize {
        /// Raw cluster count table
        #[arg(short, long)]
        counts: String,

        /// Sample sheet
        #[arg(short, long)]
        samples: String,

        /// Identity map
        #[arg(short, long)]
        identity: String,

        /// Output file path
        #[arg(short, long, default_value = "log_abundance.tsv")]
        output: String,

        /// JSON configuration file
        #[arg(long)]
        config: Option<String>,

        /// Non-sample column of the count table to skip (repeatable)
        #[arg(long, value_name = "COLUMN")]
        metadata_column: Vec<String>,
    },

    /// Simulate negative-binomial counts and a matching sample sheet
    Simulate {
        /// Output count table
        #[arg(short, long, default_value = "simulated_counts.tsv")]
        output: String,

        /// Output sample sheet
        #[arg(long, default_value = "simulated_samples.tsv")]
        samples_output: String,

        /// Output identity map, each cluster mapped to itself
        #[arg(long, default_value = "clusters.map.tsv")]
        identity_output: String,

        #[arg(long, default_value_t = 2000)]
        n_features: usize,

        #[arg(long, default_value_t = 2)]
        groups: usize,

        #[arg(long, default_value_t = 2)]
        replicates: usize,

        #[arg(long, default_value_t = 1)]
        batches: usize,

        #[arg(long, default_value_t = 0.1)]
        dispersion: f64,

        /// Fraction of features changed in group B
        #[arg(long, default_value_t = 0.0)]
        de_fraction: f64,

        /// log2 shift applied per batch step, alternating sign by feature
        #[arg(long, default_value_t = 0.0)]
        batch_shift: f64,

        #[arg(long, default_value_t = 1)]
        seed: u32,
    },
}
