//! Collapse raw tag clusters into merged clusters
//!
//! Raw clusters are summed first within their enhancer group, then enhancer
//! groups and standalone clusters that share a merged identifier are summed
//! into one row. The identity map partitions the raw clusters, so per-sample
//! totals are conserved exactly.

use std::collections::HashMap;

use ndarray::Array2;
use rayon::prelude::*;

use crate::data::{CountMatrix, IdentityMap, RawClusterTable};
use crate::error::{CageDeError, Result};

/// Sum raw cluster counts into a merged-cluster count matrix.
///
/// Rows appear in order of first occurrence of their merged id in the raw
/// table; columns keep the raw table's sample order. Any raw cluster the
/// map cannot place is fatal.
pub fn aggregate_clusters(raw: &RawClusterTable, map: &IdentityMap) -> Result<CountMatrix> {
    let clusters = raw.clusters();
    let n_samples = raw.sample_ids().len();

    let resolved: Vec<Option<(Option<&str>, &str)>> = clusters
        .par_iter()
        .map(|c| {
            map.resolve(&c.id)
                .map(|e| (e.enhancer_group.as_deref(), e.merged_id.as_str()))
        })
        .collect();

    let unmapped: Vec<&str> = clusters
        .iter()
        .zip(resolved.iter())
        .filter(|(_, r)| r.is_none())
        .map(|(c, _)| c.id.as_str())
        .collect();
    if let Some(first) = unmapped.first() {
        return Err(CageDeError::UnmappedCluster {
            cluster_id: first.to_string(),
            n_unmapped: unmapped.len(),
        });
    }

    // Stage 1: enhancer groups
    let mut group_order: Vec<&str> = Vec::new();
    let mut group_counts: HashMap<&str, Vec<u64>> = HashMap::new();
    // Units entering stage 2: (merged id, counts)
    let mut units: Vec<(&str, Vec<u64>)> = Vec::new();

    for (cluster, target) in clusters.iter().zip(resolved.iter()) {
        let Some((group, merged_id)) = *target else {
            continue;
        };
        match group {
            Some(g) => {
                let sums = group_counts.entry(g).or_insert_with(|| {
                    group_order.push(g);
                    vec![0u64; n_samples]
                });
                add_into(sums, &cluster.counts);
            }
            None => units.push((merged_id, cluster.counts.clone())),
        }
    }

    for g in &group_order {
        let merged_id = map.group_target(g).ok_or_else(|| CageDeError::InconsistentIdentityMap {
            reason: format!("enhancer group '{}' has no merged identifier", g),
        })?;
        if let Some(sums) = group_counts.remove(g) {
            units.push((merged_id, sums));
        }
    }

    // Stage 2: merged clusters, ordered by first appearance in the raw table
    let mut row_of: HashMap<&str, usize> = HashMap::new();
    let mut merged_ids: Vec<String> = Vec::new();
    for target in resolved.iter().flatten() {
        let merged_id = target.1;
        if !row_of.contains_key(merged_id) {
            row_of.insert(merged_id, merged_ids.len());
            merged_ids.push(merged_id.to_string());
        }
    }

    let mut merged = Array2::<u64>::zeros((merged_ids.len(), n_samples));
    for (merged_id, counts) in &units {
        let row = row_of[merged_id];
        for (j, &c) in counts.iter().enumerate() {
            merged[[row, j]] += c;
        }
    }

    let raw_totals = raw.library_sizes();
    let merged_totals: Vec<u64> = merged.columns().into_iter().map(|col| col.sum()).collect();
    if raw_totals != merged_totals {
        return Err(CageDeError::InvalidCountMatrix {
            reason: format!(
                "count mass not conserved by aggregation: raw={:?}, merged={:?}",
                raw_totals, merged_totals
            ),
        });
    }

    log::info!(
        "Aggregated {} raw clusters ({} enhancer groups) into {} merged clusters",
        clusters.len(),
        group_order.len(),
        merged_ids.len()
    );

    CountMatrix::from_integers(merged, merged_ids, raw.sample_ids().to_vec())
}

fn add_into(acc: &mut [u64], counts: &[u64]) {
    for (a, &c) in acc.iter_mut().zip(counts.iter()) {
        *a += c;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{RawCluster, Strand};

    fn cluster(id: &str, counts: Vec<u64>) -> RawCluster {
        RawCluster {
            id: id.to_string(),
            chrom: "chr1".to_string(),
            start: 1000,
            end: 1050,
            strand: Strand::Plus,
            counts,
        }
    }

    fn samples() -> Vec<String> {
        vec!["s1".to_string(), "s2".to_string(), "s3".to_string()]
    }

    #[test]
    fn test_enhancer_and_promoter_rows_merge() {
        let raw = RawClusterTable::new(
            vec![
                cluster("tc1", vec![1, 2, 3]),
                cluster("tc2", vec![10, 20, 30]),
                cluster("tc3", vec![100, 200, 300]),
                cluster("tc4", vec![5, 0, 5]),
            ],
            samples(),
        )
        .unwrap();

        let mut map = IdentityMap::new();
        map.insert("tc1", Some("enh1"), "m1").unwrap();
        map.insert("tc2", Some("enh1"), "m1").unwrap();
        map.insert("tc3", None, "m1").unwrap();
        map.insert("tc4", None, "m2").unwrap();

        let merged = aggregate_clusters(&raw, &map).unwrap();
        assert_eq!(merged.feature_ids(), &["m1".to_string(), "m2".to_string()]);
        assert_eq!(merged.feature_counts(0).to_vec(), vec![111.0, 222.0, 333.0]);
        assert_eq!(merged.feature_counts(1).to_vec(), vec![5.0, 0.0, 5.0]);
    }

    #[test]
    fn test_mass_is_conserved() {
        let raw = RawClusterTable::new(
            (0..20)
                .map(|i| cluster(&format!("tc{}", i), vec![i, 2 * i + 1, (i * 7) % 5]))
                .collect(),
            samples(),
        )
        .unwrap();

        let mut map = IdentityMap::new();
        for i in 0..20 {
            let group = if i % 3 == 0 { Some(format!("enh{}", i % 2)) } else { None };
            let merged = match &group {
                Some(g) => format!("m_{}", g),
                None => format!("m{}", i % 4),
            };
            map.insert(&format!("tc{}", i), group.as_deref(), &merged).unwrap();
        }

        let merged = aggregate_clusters(&raw, &map).unwrap();
        let raw_totals: Vec<f64> = raw.library_sizes().iter().map(|&x| x as f64).collect();
        assert_eq!(merged.library_sizes(), raw_totals);
    }

    #[test]
    fn test_unmapped_cluster_is_fatal() {
        let raw = RawClusterTable::new(
            vec![cluster("tc1", vec![1, 1, 1]), cluster("tc_missing", vec![2, 2, 2])],
            samples(),
        )
        .unwrap();
        let mut map = IdentityMap::new();
        map.insert("tc1", None, "m1").unwrap();

        match aggregate_clusters(&raw, &map) {
            Err(CageDeError::UnmappedCluster { cluster_id, n_unmapped }) => {
                assert_eq!(cluster_id, "tc_missing");
                assert_eq!(n_unmapped, 1);
            }
            other => panic!("expected UnmappedCluster, got {:?}", other),
        }
    }
}
