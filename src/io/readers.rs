//! Readers for the count table, sample sheet and identity map
//!
//! Tables may be tab- or comma-separated; the delimiter is taken from the
//! header line.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};

use crate::data::{FeatureAnnotation, IdentityMap, RawCluster, RawClusterTable, Sample, SampleSheet, Strand};
use crate::error::{CageDeError, Result};

/// Header names recognised as the cluster identifier column
const ID_COLUMNS: [&str; 4] = ["cluster_id", "raw_id", "id", "tc_id"];
/// Header names recognised as fixed (non-sample) columns of the count table
const LOCATION_COLUMNS: [&str; 5] = ["chrom", "chr", "start", "end", "strand"];

fn detect_delimiter(path: &Path) -> Result<u8> {
    let mut first = String::new();
    BufReader::new(File::open(path)?).read_line(&mut first)?;
    if first.trim().is_empty() {
        return Err(CageDeError::EmptyData {
            reason: format!("{} is empty", path.display()),
        });
    }
    Ok(if first.contains('\t') { b'\t' } else { b',' })
}

fn open_table(path: &Path) -> Result<csv::Reader<File>> {
    let delimiter = detect_delimiter(path)?;
    Ok(ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(Trim::All)
        .comment(Some(b'#'))
        .from_path(path)?)
}

fn find_column(headers: &StringRecord, names: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
}

fn field<'a>(record: &'a StringRecord, idx: Option<usize>) -> Option<&'a str> {
    idx.and_then(|i| record.get(i)).filter(|v| !v.is_empty())
}

/// Read the sample sheet; its row order becomes the canonical order.
pub fn read_sample_sheet<P: AsRef<Path>>(path: P) -> Result<SampleSheet> {
    let path = path.as_ref();
    let mut reader = open_table(path)?;
    let mut samples = Vec::new();
    for record in reader.deserialize::<Sample>() {
        samples.push(record.map_err(|e| CageDeError::InvalidMetadata {
            reason: format!("{}: {}", path.display(), e),
        })?);
    }
    let sheet = SampleSheet::new(samples)?;
    log::info!("Read {} samples from {}", sheet.n_samples(), path.display());
    Ok(sheet)
}

/// Read raw cluster counts and reorder the sample columns to the sheet.
///
/// The first recognised identifier column names the cluster; optional
/// `chrom`/`start`/`end`/`strand` columns give its location, and columns
/// named in `metadata_columns` are skipped. Every other column must be a
/// sample of the sheet, and every sample must be present.
pub fn read_raw_clusters<P: AsRef<Path>>(
    path: P,
    samples: &SampleSheet,
    metadata_columns: &[String],
) -> Result<RawClusterTable> {
    let path = path.as_ref();
    let mut reader = open_table(path)?;
    let headers = reader.headers()?.clone();

    let id_col = find_column(&headers, &ID_COLUMNS).unwrap_or(0);
    let chrom_col = find_column(&headers, &["chrom", "chr"]);
    let start_col = find_column(&headers, &["start"]);
    let end_col = find_column(&headers, &["end"]);
    let strand_col = find_column(&headers, &["strand"]);

    let is_fixed = |name: &str| {
        LOCATION_COLUMNS.iter().any(|n| name.eq_ignore_ascii_case(n))
            || metadata_columns.iter().any(|n| name.eq_ignore_ascii_case(n))
    };
    let sample_cols: Vec<usize> = (0..headers.len())
        .filter(|&i| i != id_col && !is_fixed(&headers[i]))
        .collect();
    let sample_header: Vec<String> = sample_cols.iter().map(|&i| headers[i].to_string()).collect();
    let positions = samples.column_positions(&sample_header, "count table")?;

    let parse_u64 = |value: &str, what: &str, row: usize| -> Result<u64> {
        value.parse::<u64>().map_err(|_| CageDeError::InvalidCountMatrix {
            reason: format!("row {}: invalid {} '{}'", row + 1, what, value),
        })
    };

    let mut clusters = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let id = field(&record, Some(id_col)).ok_or_else(|| CageDeError::InvalidCountMatrix {
            reason: format!("row {} has no cluster identifier", row + 1),
        })?;

        let counts = positions
            .iter()
            .map(|&p| {
                let value = record.get(sample_cols[p]).unwrap_or("");
                parse_u64(value, "count", row)
            })
            .collect::<Result<Vec<u64>>>()?;

        clusters.push(RawCluster {
            id: id.to_string(),
            chrom: field(&record, chrom_col).unwrap_or("").to_string(),
            start: field(&record, start_col).map(|v| parse_u64(v, "start", row)).transpose()?.unwrap_or(0),
            end: field(&record, end_col).map(|v| parse_u64(v, "end", row)).transpose()?.unwrap_or(0),
            strand: field(&record, strand_col).unwrap_or(".").parse::<Strand>()?,
            counts,
        });
    }

    if clusters.is_empty() {
        return Err(CageDeError::EmptyData {
            reason: format!("no clusters in {}", path.display()),
        });
    }
    log::info!("Read {} raw clusters from {}", clusters.len(), path.display());
    RawClusterTable::new(clusters, samples.sample_ids())
}

/// Read the identity map with its annotation columns.
///
/// Required columns: a raw identifier and `merged_id`. Optional:
/// `enhancer_group` plus any of the annotation columns.
pub fn read_identity_map<P: AsRef<Path>>(path: P) -> Result<IdentityMap> {
    let path = path.as_ref();
    let mut reader = open_table(path)?;
    let headers = reader.headers()?.clone();

    let raw_col = find_column(&headers, &ID_COLUMNS).ok_or_else(|| CageDeError::InconsistentIdentityMap {
        reason: format!("{} has no raw cluster identifier column", path.display()),
    })?;
    let merged_col = find_column(&headers, &["merged_id", "merged"]).ok_or_else(|| {
        CageDeError::InconsistentIdentityMap {
            reason: format!("{} has no merged_id column", path.display()),
        }
    })?;
    let group_col = find_column(&headers, &["enhancer_group", "enhancer"]);
    let annotation_cols: Vec<Option<usize>> = FeatureAnnotation::COLUMNS
        .iter()
        .map(|c| find_column(&headers, &[*c]))
        .collect();

    let mut map = IdentityMap::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let raw_id = field(&record, Some(raw_col)).ok_or_else(|| CageDeError::InconsistentIdentityMap {
            reason: format!("row {} has no raw cluster identifier", row + 1),
        })?;
        let merged_id = field(&record, Some(merged_col)).unwrap_or("");
        map.insert(raw_id, field(&record, group_col), merged_id)?;

        let text = |k: usize| field(&record, annotation_cols[k]).map(str::to_string);
        let number = |k: usize| field(&record, annotation_cols[k]).and_then(|v| v.parse::<u64>().ok());
        let annotation = FeatureAnnotation {
            chrom: text(0),
            start: number(1),
            end: number(2),
            strand: text(3),
            gene_name: text(4),
            gene_class: text(5),
            entrez_id: text(6),
        };
        if annotation != FeatureAnnotation::default() {
            map.annotate(merged_id, annotation);
        }
    }

    log::info!(
        "Read identity map: {} raw clusters, {} enhancer groups",
        map.n_entries(),
        map.n_enhancer_groups()
    );
    Ok(map)
}
