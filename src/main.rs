//! rust_cage_de command-line interface

use clap::Parser;
use log::{info, LevelFilter};

use rust_cage_de::cli::{Cli, Commands};
use rust_cage_de::prelude::*;
use rust_cage_de::simulate::{simulate_counts, SimulationParams};

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Commands::Run {
            counts,
            samples,
            identity,
            output,
            contrast,
            config,
            min_lfc,
            max_fdr,
            significant_only,
            metadata_column,
            dispersion,
            threads,
        } => load_config(config.as_deref())
            .and_then(|mut cfg| {
                if let Some(v) = min_lfc {
                    cfg.test.min_log_fold_change = v;
                }
                if let Some(v) = max_fdr {
                    cfg.test.max_fdr = v;
                }
                if significant_only {
                    cfg.test.significant_only = true;
                }
                cfg.metadata_columns.extend(metadata_column);
                if let Some(kind) = dispersion.as_deref() {
                    cfg.dispersion.fit_dispersion = parse_dispersion_choice(kind)?;
                }
                cfg.validate()?;
                Ok(cfg)
            })
            .and_then(|cfg| run(&counts, &samples, &identity, &output, &contrast, &cfg, threads)),
        Commands::Normalize {
            counts,
            samples,
            identity,
            output,
            config,
            metadata_column,
        } => load_config(config.as_deref())
            .and_then(|mut cfg| {
                cfg.metadata_columns.extend(metadata_column);
                run_normalize(&counts, &samples, &identity, &output, &cfg)
            }),
        Commands::Simulate {
            output,
            samples_output,
            identity_output,
            n_features,
            groups,
            replicates,
            batches,
            dispersion,
            de_fraction,
            batch_shift,
            seed,
        } => {
            let params = SimulationParams {
                n_features,
                n_groups: groups,
                replicates,
                n_batches: batches,
                dispersion,
                de_fraction,
                batch_log2_shift: batch_shift,
                seed,
                ..SimulationParams::default()
            };
            run_simulate(&params, &output, &samples_output, &identity_output)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&str>) -> Result<AnalysisConfig> {
    match path {
        Some(p) => {
            info!("Loading configuration from: {}", p);
            AnalysisConfig::from_json_file(p)
        }
        None => Ok(AnalysisConfig::default()),
    }
}

fn parse_dispersion_choice(kind: &str) -> Result<DispersionChoice> {
    match kind {
        "common" => Ok(DispersionChoice::Common),
        "trended" => Ok(DispersionChoice::Trended),
        "tagwise" => Ok(DispersionChoice::Tagwise),
        other => Err(CageDeError::InvalidConfig {
            reason: format!("unknown dispersion '{}' (use common, trended or tagwise)", other),
        }),
    }
}

fn load_inputs(
    counts_path: &str,
    samples_path: &str,
    identity_path: &str,
    config: &AnalysisConfig,
) -> Result<(SampleSheet, RawClusterTable, IdentityMap)> {
    let samples = read_sample_sheet(samples_path)?;
    let raw = read_raw_clusters(counts_path, &samples, &config.metadata_columns)?;
    let map = read_identity_map(identity_path)?;
    Ok((samples, raw, map))
}

fn run(
    counts_path: &str,
    samples_path: &str,
    identity_path: &str,
    output_dir: &str,
    contrasts: &[String],
    config: &AnalysisConfig,
    threads: usize,
) -> Result<()> {
    if threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .ok();
    }

    let (samples, raw, map) = load_inputs(counts_path, samples_path, identity_path, config)?;
    let analysis = run_analysis(&raw, &map, &samples, config, contrasts)?;

    info!(
        "Common dispersion {:.4} (BCV {:.3})",
        analysis.dispersions.common(),
        analysis.dispersions.bcv()
    );

    let written = write_outputs(&analysis, &map, output_dir)?;
    for name in &written.empty_contrasts {
        info!("{}: empty call, no table written", name);
    }
    info!(
        "Done: {} DE tables, {} empty contrasts, outputs in {}",
        written.de_tables.len(),
        written.empty_contrasts.len(),
        output_dir
    );
    Ok(())
}

fn run_normalize(
    counts_path: &str,
    samples_path: &str,
    identity_path: &str,
    output_path: &str,
    config: &AnalysisConfig,
) -> Result<()> {
    config.validate()?;
    let (samples, raw, map) = load_inputs(counts_path, samples_path, identity_path, config)?;
    let counts = aggregate_clusters(&raw, &map)?;
    let prepared = prepare_counts(&counts, &samples, config)?;
    for (id, f) in prepared.libs.sample_ids().iter().zip(prepared.libs.norm_factors()) {
        info!("  {}: norm factor {:.4}", id, f);
    }

    let adjusted = project_batch_effect(&prepared, &samples)?;
    write_log_abundance(output_path, &adjusted, &map)?;
    info!("Done!");
    Ok(())
}

fn run_simulate(params: &SimulationParams, counts_path: &str, samples_path: &str, identity_path: &str) -> Result<()> {
    let sim = simulate_counts(params)?;
    write_count_table(counts_path, &sim.counts)?;
    write_sample_sheet(samples_path, &sim.samples)?;
    write_identity_map(identity_path, &sim.identity)?;
    info!(
        "Wrote counts to {}, samples to {} and identity map to {}",
        counts_path, samples_path, identity_path
    );
    Ok(())
}
