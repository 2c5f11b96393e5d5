//! End-to-end differential-activity run
//!
//! Stages hand each other immutable values. The canonical sample order of
//! the sheet is asserted at every boundary.

use std::path::{Path, PathBuf};

use crate::aggregate::aggregate_clusters;
use crate::config::AnalysisConfig;
use crate::data::{CountMatrix, IdentityMap, RawClusterTable, SampleSheet};
use crate::dispersion::{estimate_dispersions, DispersionModel};
use crate::error::{CageDeError, Result};
use crate::filter::filter_by_expression;
use crate::glm::{fit_ql, DesignMatrix, FittedModel};
use crate::io::{write_de_table, write_log_abundance, GeneSetCatalog};
use crate::normalization::{
    calc_norm_factors, log_cpm, remove_batch_effect, AdjustedLogExpression, LibrarySizes,
    TrimFractions, PRIOR_COUNT,
};
use crate::testing::{treat_contrasts, Contrast, DeResult};

/// Filtered counts with their library sizes and design
#[derive(Debug, Clone)]
pub struct PreparedCounts {
    pub counts: CountMatrix,
    pub libs: LibrarySizes,
    pub design: DesignMatrix,
}

/// Everything a run produces
#[derive(Debug)]
pub struct Analysis {
    pub prepared: PreparedCounts,
    pub dispersions: DispersionModel,
    pub model: FittedModel,
    pub results: Vec<DeResult>,
    pub log_abundance: AdjustedLogExpression,
}

/// TMM library sizes for a count matrix.
pub fn normalize_counts(counts: &CountMatrix, trim: &TrimFractions) -> Result<LibrarySizes> {
    let raw = counts.library_sizes();
    let factors = calc_norm_factors(counts.counts(), &raw, trim)?;
    for ((id, size), factor) in counts.sample_ids().iter().zip(&raw).zip(&factors) {
        log::debug!("  {}: library {:.0}, norm factor {:.4}", id, size, factor);
    }
    LibrarySizes::new(counts.sample_ids().to_vec(), raw, factors)
}

/// Filter, normalize and build the design for aggregated counts.
pub fn prepare_counts(counts: &CountMatrix, samples: &SampleSheet, config: &AnalysisConfig) -> Result<PreparedCounts> {
    samples.ensure_order("aggregation", counts.sample_ids())?;

    let filtered = filter_by_expression(counts, &config.filter)?;
    samples.ensure_order("filter", filtered.sample_ids())?;

    let libs = normalize_counts(&filtered, &config.trim)?;
    samples.ensure_order("normalization", libs.sample_ids())?;

    let design = DesignMatrix::from_sample_sheet(samples)?;
    Ok(PreparedCounts {
        counts: filtered,
        libs,
        design,
    })
}

/// Turn contrast texts into contrasts over the design's coefficients.
///
/// `B.vs.A` is the pairwise difference of two coefficients; anything else
/// goes through [`Contrast::parse`]. With no texts, every pair of groups
/// is compared, later level against earlier.
pub fn build_contrasts(design: &DesignMatrix, texts: &[String]) -> Result<Vec<Contrast>> {
    let coef_names = design.coef_names();
    if texts.is_empty() {
        let groups = &coef_names[..design.n_group_columns()];
        let mut contrasts = Vec::new();
        for (i, denominator) in groups.iter().enumerate() {
            for numerator in &groups[i + 1..] {
                contrasts.push(Contrast::pairwise(coef_names, numerator, denominator)?);
            }
        }
        return Ok(contrasts);
    }

    texts
        .iter()
        .map(|text| match (text.contains('='), text.split_once(".vs.")) {
            (false, Some((numerator, denominator))) => {
                Contrast::pairwise(coef_names, numerator.trim(), denominator.trim())
            }
            _ => Contrast::parse(text, coef_names),
        })
        .collect()
}

/// Batch-adjusted log-CPM of the prepared counts, for reporting only.
pub fn project_batch_effect(prepared: &PreparedCounts, samples: &SampleSheet) -> Result<AdjustedLogExpression> {
    let expr = log_cpm(prepared.counts.counts(), &prepared.libs.effective(), PRIOR_COUNT)?;
    let adjusted = remove_batch_effect(expr.view(), prepared.counts.feature_ids(), samples)?;
    samples.ensure_order("batch projection", adjusted.sample_ids())?;
    Ok(adjusted)
}

/// Dispersions, QL fit and contrast tests on aggregated counts.
pub fn analyze_counts(
    counts: &CountMatrix,
    samples: &SampleSheet,
    config: &AnalysisConfig,
    contrast_texts: &[String],
) -> Result<Analysis> {
    config.validate()?;
    let prepared = prepare_counts(counts, samples, config)?;
    let contrasts = build_contrasts(&prepared.design, contrast_texts)?;
    if contrasts.is_empty() {
        return Err(CageDeError::InvalidContrast {
            contrast: String::new(),
            reason: "design has fewer than two groups and no contrast was given".to_string(),
        });
    }

    let dispersions = estimate_dispersions(
        &prepared.counts,
        &prepared.design,
        &prepared.libs,
        &config.dispersion,
        &config.glm,
    )?;
    let model = fit_ql(
        &prepared.counts,
        &prepared.design,
        &prepared.libs,
        &dispersions,
        &config.dispersion,
        &config.glm,
    )?;
    samples.ensure_order("model fit", model.sample_ids())?;
    log::info!("{}", model.summary());

    let results = treat_contrasts(&model, &contrasts, &config.test)?;

    let log_abundance = project_batch_effect(&prepared, samples)?;

    Ok(Analysis {
        prepared,
        dispersions,
        model,
        results,
        log_abundance,
    })
}

/// Aggregate raw clusters through the identity map, then analyze.
pub fn run_analysis(
    raw: &RawClusterTable,
    map: &IdentityMap,
    samples: &SampleSheet,
    config: &AnalysisConfig,
    contrast_texts: &[String],
) -> Result<Analysis> {
    let counts = aggregate_clusters(raw, map)?;
    analyze_counts(&counts, samples, config, contrast_texts)
}

/// Paths written by [`write_outputs`]
#[derive(Debug, Clone, Default)]
pub struct WrittenOutputs {
    pub log_abundance: PathBuf,
    pub de_tables: Vec<PathBuf>,
    pub empty_contrasts: Vec<String>,
    pub catalog: PathBuf,
}

/// Write the log-abundance table, one DE table per non-empty contrast and
/// the gene-set catalog into `out_dir`.
pub fn write_outputs<P: AsRef<Path>>(analysis: &Analysis, map: &IdentityMap, out_dir: P) -> Result<WrittenOutputs> {
    let out_dir = out_dir.as_ref();
    std::fs::create_dir_all(out_dir)?;

    let log_abundance = out_dir.join("log_abundance.tsv");
    write_log_abundance(&log_abundance, &analysis.log_abundance, map)?;

    let mut de_tables = Vec::new();
    let mut empty_contrasts = Vec::new();
    for result in &analysis.results {
        match write_de_table(out_dir, result, map)? {
            Some(path) => de_tables.push(path),
            None => empty_contrasts.push(result.contrast.clone()),
        }
    }

    let catalog = out_dir.join("gene_sets.json");
    GeneSetCatalog::build(analysis.prepared.counts.feature_ids(), &analysis.results, map).to_json_file(&catalog)?;

    Ok(WrittenOutputs {
        log_abundance,
        de_tables,
        empty_contrasts,
        catalog,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Sample;
    use ndarray::array;

    fn sheet() -> SampleSheet {
        SampleSheet::new(vec![
            Sample::new("A1", "A", "L1"),
            Sample::new("A2", "A", "L1"),
            Sample::new("B1", "B", "L1"),
            Sample::new("B2", "B", "L1"),
            Sample::new("C1", "C", "L1"),
            Sample::new("C2", "C", "L1"),
        ])
        .unwrap()
    }

    fn design() -> DesignMatrix {
        DesignMatrix::from_sample_sheet(&sheet()).unwrap()
    }

    #[test]
    fn test_default_contrasts_cover_all_pairs() {
        let contrasts = build_contrasts(&design(), &[]).unwrap();
        let names: Vec<&str> = contrasts.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["B.vs.A", "C.vs.A", "C.vs.B"]);
    }

    #[test]
    fn test_contrast_texts() {
        let texts = vec!["C.vs.B".to_string(), "BvsRest=B-0.5*A-0.5*C".to_string()];
        let contrasts = build_contrasts(&design(), &texts).unwrap();
        assert_eq!(contrasts[0].weights(), &[0.0, -1.0, 1.0]);
        assert_eq!(contrasts[1].name(), "BvsRest");
        assert_eq!(contrasts[1].weights(), &[-0.5, 1.0, -0.5]);
    }

    #[test]
    fn test_unknown_coefficient_is_fatal() {
        let err = build_contrasts(&design(), &["D.vs.A".to_string()]).unwrap_err();
        assert!(matches!(err, CageDeError::UnknownCoefficient { ref coefficient, .. } if coefficient == "D"));
    }

    #[test]
    fn test_misordered_counts_rejected() {
        let counts = CountMatrix::new(
            array![[10.0, 10.0, 10.0, 10.0, 10.0, 10.0]],
            vec!["m1".to_string()],
            ["A2", "A1", "B1", "B2", "C1", "C2"].iter().map(|s| s.to_string()).collect(),
        )
        .unwrap();
        let err = prepare_counts(&counts, &sheet(), &AnalysisConfig::default()).unwrap_err();
        assert!(matches!(err, CageDeError::SampleOrderMismatch { .. }));
    }

    #[test]
    fn test_normalize_counts_centres_factors() {
        let counts = CountMatrix::new(
            array![[10.0, 20.0, 15.0], [30.0, 25.0, 40.0], [5.0, 9.0, 6.0], [100.0, 90.0, 120.0]],
            (1..=4).map(|i| format!("m{}", i)).collect(),
            vec!["S1".to_string(), "S2".to_string(), "S3".to_string()],
        )
        .unwrap();
        let libs = normalize_counts(&counts, &TrimFractions::default()).unwrap();
        let log_sum: f64 = libs.norm_factors().iter().map(|f| f.ln()).sum();
        assert!(log_sum.abs() < 1e-10);
        assert_eq!(libs.raw(), counts.library_sizes().as_slice());
    }
}
