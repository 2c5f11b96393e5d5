//! Tab-separated output tables

use std::fs;
use std::path::{Path, PathBuf};

use csv::WriterBuilder;

use crate::data::{CountMatrix, FeatureAnnotation, IdentityMap, SampleSheet};
use crate::error::Result;
use crate::normalization::AdjustedLogExpression;
use crate::testing::DeResult;

fn annotation_fields(map: &IdentityMap, feature_id: &str) -> [String; 7] {
    map.annotation(feature_id)
        .map(FeatureAnnotation::fields)
        .unwrap_or_default()
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NA".to_string()
    } else {
        format!("{:.6}", value)
    }
}

fn format_pvalue(value: f64) -> String {
    if value.is_nan() {
        "NA".to_string()
    } else {
        format!("{:.6e}", value)
    }
}

/// File name for a contrast's table: anything outside `[A-Za-z0-9._-]`
/// becomes an underscore.
pub fn contrast_file_name(contrast: &str) -> String {
    let stem: String = contrast
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}.de.tsv", stem)
}

/// Write integer counts with a `cluster_id` column, readable by
/// [`read_raw_clusters`](crate::io::read_raw_clusters).
pub fn write_count_table<P: AsRef<Path>>(path: P, counts: &CountMatrix) -> Result<()> {
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(path.as_ref())?;

    let mut header = vec!["cluster_id".to_string()];
    header.extend(counts.sample_ids().iter().cloned());
    writer.write_record(&header)?;

    for (i, feature_id) in counts.feature_ids().iter().enumerate() {
        let mut record = vec![feature_id.clone()];
        record.extend(counts.feature_counts(i).iter().map(|&c| format!("{:.0}", c)));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_sample_sheet<P: AsRef<Path>>(path: P, samples: &SampleSheet) -> Result<()> {
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(path.as_ref())?;
    for sample in samples.samples() {
        writer.serialize(sample)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the identity map in the layout
/// [`read_identity_map`](crate::io::read_identity_map) reads back.
pub fn write_identity_map<P: AsRef<Path>>(path: P, map: &IdentityMap) -> Result<()> {
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(path.as_ref())?;
    writer.write_record(["raw_id", "enhancer_group", "merged_id"])?;
    for (raw_id, entry) in map.entries() {
        writer.write_record([
            raw_id,
            entry.enhancer_group.as_deref().unwrap_or(""),
            entry.merged_id.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the batch-adjusted log-abundance table, one row per feature.
pub fn write_log_abundance<P: AsRef<Path>>(
    path: P,
    adjusted: &AdjustedLogExpression,
    map: &IdentityMap,
) -> Result<()> {
    let path = path.as_ref();
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(path)?;

    let mut header = vec!["feature_id".to_string()];
    header.extend(FeatureAnnotation::COLUMNS.iter().map(|c| c.to_string()));
    header.extend(adjusted.sample_ids().iter().cloned());
    writer.write_record(&header)?;

    let values = adjusted.values();
    for (i, feature_id) in adjusted.feature_ids().iter().enumerate() {
        let mut record = vec![feature_id.clone()];
        record.extend(annotation_fields(map, feature_id));
        record.extend(values.row(i).iter().map(|&v| format_value(v)));
        writer.write_record(&record)?;
    }
    writer.flush()?;

    log::info!(
        "Wrote log-abundance table ({} features) to {}",
        adjusted.n_features(),
        path.display()
    );
    Ok(())
}

/// Write the table for one contrast into `dir`.
///
/// A contrast with no significant feature writes nothing and returns
/// `None`; that is an ordinary outcome.
pub fn write_de_table<P: AsRef<Path>>(
    dir: P,
    result: &DeResult,
    map: &IdentityMap,
) -> Result<Option<PathBuf>> {
    if result.is_empty_call() {
        log::info!("{}: no features pass the thresholds, no table written", result.contrast);
        return Ok(None);
    }

    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let path = dir.join(contrast_file_name(&result.contrast));
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(&path)?;

    let mut header = vec!["feature_id".to_string()];
    header.extend(FeatureAnnotation::COLUMNS.iter().map(|c| c.to_string()));
    header.extend(
        ["log_fc", "log_cpm", "pvalue", "fdr", "significant"]
            .iter()
            .map(|c| c.to_string()),
    );
    writer.write_record(&header)?;

    for row in &result.rows {
        let mut record = vec![row.feature_id.clone()];
        record.extend(annotation_fields(map, &row.feature_id));
        record.push(format_value(row.log_fc));
        record.push(format_value(row.log_cpm));
        record.push(format_pvalue(row.pvalue));
        record.push(format_pvalue(row.fdr));
        record.push(row.significant.to_string());
        writer.write_record(&record)?;
    }
    writer.flush()?;

    log::info!(
        "{}: wrote {} rows ({} significant) to {}",
        result.contrast,
        result.rows.len(),
        result.n_significant(),
        path.display()
    );
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{DeRow, TestParams};
    use tempfile::tempdir;

    fn row(id: &str, log_fc: f64, significant: bool) -> DeRow {
        DeRow {
            feature_id: id.to_string(),
            log_fc,
            log_cpm: 5.0,
            pvalue: if significant { 1e-6 } else { 0.4 },
            fdr: if significant { 1e-5 } else { 0.6 },
            significant,
        }
    }

    fn result(rows: Vec<DeRow>) -> DeResult {
        let n = rows.len();
        DeResult {
            contrast: "A.vs.B".to_string(),
            params: TestParams::default(),
            rows,
            n_tested: n,
            n_unavailable: 0,
        }
    }

    #[test]
    fn test_count_table_and_sheet_read_back() {
        use crate::data::Sample;
        use crate::io::{read_raw_clusters, read_sample_sheet};

        let dir = tempdir().unwrap();
        let sheet = SampleSheet::new(vec![Sample::new("A1", "A", "L1"), Sample::new("B1", "B", "L2")]).unwrap();
        let counts = CountMatrix::new(
            ndarray::array![[3.0, 0.0], [12.0, 40.0]],
            vec!["f1".to_string(), "f2".to_string()],
            sheet.sample_ids(),
        )
        .unwrap();

        let sheet_path = dir.path().join("samples.tsv");
        let counts_path = dir.path().join("counts.tsv");
        write_sample_sheet(&sheet_path, &sheet).unwrap();
        write_count_table(&counts_path, &counts).unwrap();

        let sheet_back = read_sample_sheet(&sheet_path).unwrap();
        assert_eq!(sheet_back.samples(), sheet.samples());
        let table = read_raw_clusters(&counts_path, &sheet_back, &[]).unwrap();
        assert_eq!(table.clusters()[1].counts, vec![12, 40]);
        assert_eq!(table.clusters()[0].id, "f1");
    }

    #[test]
    fn test_identity_map_read_back() {
        use crate::io::read_identity_map;

        let dir = tempdir().unwrap();
        let mut map = IdentityMap::new();
        map.insert("tc2", Some("enh1"), "m1").unwrap();
        map.insert("tc1", Some("enh1"), "m1").unwrap();
        map.insert("tc3", None, "tc3").unwrap();

        let path = dir.path().join("clusters.map.tsv");
        write_identity_map(&path, &map).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("raw_id\tenhancer_group\tmerged_id\ntc1\tenh1\tm1\n"));

        let back = read_identity_map(&path).unwrap();
        assert_eq!(back.n_entries(), 3);
        assert_eq!(back.group_target("enh1"), Some("m1"));
        assert_eq!(back.resolve("tc3").unwrap().enhancer_group, None);
        assert_eq!(back.resolve("tc3").unwrap().merged_id, "tc3");
    }

    #[test]
    fn test_contrast_file_name() {
        assert_eq!(contrast_file_name("A.vs.B"), "A.vs.B.de.tsv");
        assert_eq!(contrast_file_name("X=(A+B)/2"), "X__A_B__2.de.tsv");
    }

    #[test]
    fn test_empty_call_writes_nothing() {
        let dir = tempdir().unwrap();
        let out = write_de_table(dir.path(), &result(vec![row("m1", 0.1, false)]), &IdentityMap::new()).unwrap();
        assert!(out.is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_de_table_carries_annotation() {
        let dir = tempdir().unwrap();
        let mut map = IdentityMap::new();
        map.insert("tc1", None, "m1").unwrap();
        map.annotate(
            "m1",
            FeatureAnnotation {
                gene_name: Some("GATA1".to_string()),
                entrez_id: Some("2623".to_string()),
                ..FeatureAnnotation::default()
            },
        );

        let path = write_de_table(
            dir.path(),
            &result(vec![row("m1", 2.5, true), row("m2", 0.2, false)]),
            &map,
        )
        .unwrap()
        .unwrap();

        let text = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("feature_id\tchrom"));
        assert!(lines[1].starts_with("m1\t"));
        assert!(lines[1].contains("GATA1"));
        assert!(lines[1].ends_with("true"));
        assert!(lines[2].ends_with("false"));
    }
}
