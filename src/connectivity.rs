
use crate::data_types::variants::ReadId;
use crate::evidence::EvidenceSet;

use log::debug;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use serde::Serialize;
use statrs::distribution::{Binomial, DiscreteCDF};

/// Variant-level connectivity: for each variant, the set of variants it co-occurs with on >= 1 read
pub type OverlapMap = HashMap<usize, HashSet<usize>>;

/// One allele instance: (variant index, called-allele bit)
pub type AlleleNode = (usize, u8);

/// Allele-level connectivity built from edges that passed the significance filter
pub type AlleleGraph = HashMap<AlleleNode, HashSet<AlleleNode>>;

/// The two-variant configuration chosen by the evidence
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeConfiguration {
    /// allele0-allele0 / allele1-allele1 on the same copies
    Cis,
    /// allele0-allele1 / allele1-allele0 across copies
    Trans,
    /// exact support tie, no configuration can be chosen
    Ambiguous
}

/// Parameters of the conflicting-configuration noise test.
/// The success probability `1 - (k1*e + k2*e^2)` models two independent per-base error
/// opportunities with a second-order correction; the coefficients are empirical and kept
/// configurable so the statistical behavior stays reproducible across versions.
#[derive(Clone, Copy, Debug)]
pub struct NoiseModel {
    /// The genome-wide base-error rate from the noise estimator
    pub error_rate: f64,
    /// Linear coefficient of the error expansion (default 6)
    pub linear_coef: f64,
    /// Quadratic coefficient of the error expansion (default 10)
    pub quadratic_coef: f64
}

impl NoiseModel {
    /// Creates a model with the standard coefficients
    pub fn new(error_rate: f64) -> NoiseModel {
        NoiseModel {
            error_rate,
            linear_coef: 6.0,
            quadratic_coef: 10.0
        }
    }

    /// The probability that a single co-observation supports the true configuration
    pub fn success_probability(&self) -> f64 {
        let e: f64 = self.error_rate;
        (1.0 - (self.linear_coef * e + self.quadratic_coef * e * e)).clamp(0.0, 1.0)
    }
}

/// The outcome of testing one variant pair against the noise model.
/// Every tested pair produces one of these, whether or not the edge survives.
#[derive(Clone, Debug)]
pub struct ConnectionTest {
    /// The first variant of the pair
    pub variant_a: usize,
    /// The second variant of the pair
    pub variant_b: usize,
    /// Reads supporting the winning configuration
    pub supporting: u64,
    /// All co-observations of the pair, including conflicting and other-base reads
    pub total: u64,
    /// The probability of seeing at most `supporting` consistent co-observations under the noise model
    pub conflicting_config_p: f64,
    /// The winning configuration
    pub configuration: EdgeConfiguration,
    /// Whether the winning configuration agrees with the input phase, when both variants carry one
    pub phase_concordant: Option<bool>
}

/// Builds the variant co-observation graph for one chromosome: every read that touched
/// two or more variants connects each pair it touched. The restriction to a single
/// chromosome is deliberate; trans-chromosomal connections are not modeled.
/// # Arguments
/// * `evidence` - the aggregated evidence
/// * `chrom` - the chromosome to build the graph for
pub fn build_overlap_map(evidence: &EvidenceSet, chrom: &str) -> OverlapMap {
    let mut overlap_map: OverlapMap = Default::default();
    let chrom_reads = match evidence.chromosome_read_variants(chrom) {
        Some(cr) => cr,
        None => return overlap_map
    };

    for touched in chrom_reads.values() {
        if touched.len() < 2 {
            continue;
        }
        for (i, &variant_a) in touched.iter().enumerate() {
            for &variant_b in touched[i+1..].iter() {
                overlap_map.entry(variant_a).or_default().insert(variant_b);
                overlap_map.entry(variant_b).or_default().insert(variant_a);
            }
        }
    }
    overlap_map
}

/// Extracts every unordered variant pair from an overlap map, sorted by genomic
/// coordinate so downstream testing and reporting are deterministic.
/// # Arguments
/// * `evidence` - the aggregated evidence, used for coordinate sorting
/// * `overlap_map` - the co-observation graph
pub fn connection_candidates(evidence: &EvidenceSet, overlap_map: &OverlapMap) -> Vec<(usize, usize)> {
    let mut pairs: HashSet<(usize, usize)> = Default::default();
    for (&variant_a, connected) in overlap_map.iter() {
        for &variant_b in connected.iter() {
            pairs.insert((variant_a.min(variant_b), variant_a.max(variant_b)));
        }
    }

    let mut candidates: Vec<(usize, usize)> = pairs.into_iter().collect();
    candidates.sort_by(|&(a1, b1), &(a2, b2)| {
        let key1 = (evidence.variant(a1).position(), evidence.variant(b1).position(), a1, b1);
        let key2 = (evidence.variant(a2).position(), evidence.variant(b2).position(), a2, b2);
        key1.cmp(&key2)
    });
    candidates
}

/// Counts the elements shared by two read sets, iterating the smaller one
fn intersection_count(set_a: &HashSet<ReadId>, set_b: &HashSet<ReadId>) -> u64 {
    let (small, large) = if set_a.len() <= set_b.len() { (set_a, set_b) } else { (set_b, set_a) };
    small.iter().filter(|r| large.contains(r)).count() as u64
}

/// Tests a single variant pair against the noise model.
/// Support for the two possible configurations comes from read-set intersections; the
/// conflicting-configuration probability is the binomial CDF of the winning support under
/// the model's success probability. Pairs with zero supporting reads get p = 0 (always
/// pruned); pairs with no conflicting evidence at all get p = 1 (always pass).
/// # Arguments
/// * `evidence` - the aggregated evidence
/// * `variant_a` - the first variant of the pair
/// * `variant_b` - the second variant of the pair
/// * `model` - the noise model snapshot
pub fn test_variant_connection(evidence: &EvidenceSet, variant_a: usize, variant_b: usize, model: &NoiseModel) -> ConnectionTest {
    let var_a = evidence.variant(variant_a);
    let var_b = evidence.variant(variant_b);

    // a[0]b[0] | a[1]b[1]
    let cis_support: u64 = intersection_count(var_a.allele_reads(0), var_b.allele_reads(0))
        + intersection_count(var_a.allele_reads(1), var_b.allele_reads(1));
    // a[0]b[1] | a[1]b[0]
    let trans_support: u64 = intersection_count(var_a.allele_reads(0), var_b.allele_reads(1))
        + intersection_count(var_a.allele_reads(1), var_b.allele_reads(0));

    // all co-observations where either side displayed a base matching neither allele
    let other_support: u64 = intersection_count(var_a.other_reads(), var_b.allele_reads(0))
        + intersection_count(var_a.other_reads(), var_b.allele_reads(1))
        + intersection_count(var_a.allele_reads(0), var_b.other_reads())
        + intersection_count(var_a.allele_reads(1), var_b.other_reads())
        + intersection_count(var_a.other_reads(), var_b.other_reads());

    let c_supporting: u64 = cis_support.max(trans_support);
    let configuration: EdgeConfiguration = match cis_support.cmp(&trans_support) {
        std::cmp::Ordering::Greater => EdgeConfiguration::Cis,
        std::cmp::Ordering::Less => EdgeConfiguration::Trans,
        std::cmp::Ordering::Equal => EdgeConfiguration::Ambiguous
    };

    // reads conflict when they contradict the winning configuration; on an exact tie no
    // configuration is chosen, so only other-base reads count against the connection
    let c_total: u64 = if configuration == EdgeConfiguration::Ambiguous {
        c_supporting + other_support
    } else {
        cis_support + trans_support + other_support
    };

    let conflicting_config_p: f64 = if c_supporting == 0 {
        // nothing supports either configuration, treat as unsupported
        0.0
    } else if c_total == c_supporting {
        // no conflicting evidence at all, passes trivially
        1.0
    } else {
        // success probability is clamped into [0, 1], so construction cannot fail
        let binomial = Binomial::new(model.success_probability(), c_total).unwrap();
        binomial.cdf(c_supporting)
    };

    // phase concordance is reporting-only and needs a winner plus input phase on both sides
    let phase_concordant: Option<bool> = match configuration {
        EdgeConfiguration::Cis => match (var_a.input_phase_bit(0), var_b.input_phase_bit(0)) {
            (Some(bit_a), Some(bit_b)) => Some(bit_a == bit_b),
            _ => None
        },
        EdgeConfiguration::Trans => match (var_a.input_phase_bit(1), var_b.input_phase_bit(0)) {
            (Some(bit_a), Some(bit_b)) => Some(bit_a == bit_b),
            _ => None
        },
        EdgeConfiguration::Ambiguous => None
    };

    ConnectionTest {
        variant_a,
        variant_b,
        supporting: c_supporting,
        total: c_total,
        conflicting_config_p,
        configuration,
        phase_concordant
    }
}

/// Applies the test outcomes to the graphs: failing edges are removed from the overlap
/// map in both directions (and isolated endpoints leave the map entirely); passing edges
/// with a chosen configuration materialize their four allele connections.
/// Returns the number of dropped connections.
/// # Arguments
/// * `overlap_map` - the co-observation graph to prune in place
/// * `allele_graph` - the allele connectivity graph to extend in place
/// * `tests` - all test outcomes
/// * `cc_threshold` - edges with `conflicting_config_p` below this are pruned
pub fn apply_connection_tests(
    overlap_map: &mut OverlapMap,
    allele_graph: &mut AlleleGraph,
    tests: &[ConnectionTest],
    cc_threshold: f64
) -> usize {
    let mut dropped: usize = 0;
    for test in tests.iter() {
        if test.conflicting_config_p < cc_threshold {
            remove_edge(overlap_map, test.variant_a, test.variant_b);
            dropped += 1;
            continue;
        }

        let (a, b) = (test.variant_a, test.variant_b);
        let connections: Vec<(AlleleNode, AlleleNode)> = match test.configuration {
            EdgeConfiguration::Cis => vec![((a, 0), (b, 0)), ((a, 1), (b, 1))],
            EdgeConfiguration::Trans => vec![((a, 0), (b, 1)), ((a, 1), (b, 0))],
            // an ambiguous edge keeps the variants connected but implies no allele pairing
            EdgeConfiguration::Ambiguous => vec![]
        };
        for (node_a, node_b) in connections {
            allele_graph.entry(node_a).or_default().insert(node_b);
            allele_graph.entry(node_b).or_default().insert(node_a);
        }
    }

    debug!("dropped {} of {} tested connections", dropped, tests.len());
    dropped
}

/// Removes an edge in both directions, deleting endpoints that become isolated
fn remove_edge(overlap_map: &mut OverlapMap, variant_a: usize, variant_b: usize) {
    for (from, to) in [(variant_a, variant_b), (variant_b, variant_a)] {
        if let Some(connected) = overlap_map.get_mut(&from) {
            connected.remove(&to);
            if connected.is_empty() {
                overlap_map.remove(&from);
            }
        }
    }
}

/// One undirected allele-level junction with its supporting read count, for network output
#[derive(Clone, Debug)]
pub struct AlleleJunction {
    pub node_a: AlleleNode,
    pub node_b: AlleleNode,
    /// Number of reads spanning this exact allele pair
    pub junction_reads: u64,
    /// 0 for directly observed junctions, 1 for the complementary pair inferred from them
    pub inferred: u8
}

/// Enumerates the full allele-connectivity network over a set of variants: for every
/// variant pair and allele combination, the junction read count, plus the complementary
/// junction flagged as inferred. Used only for the optional network output.
/// # Arguments
/// * `evidence` - the aggregated evidence
/// * `variants` - the variants to enumerate, typically one block
pub fn allele_network(evidence: &EvidenceSet, variants: &[usize]) -> Vec<AlleleJunction> {
    let mut junctions: Vec<AlleleJunction> = vec![];
    for (i, &variant_a) in variants.iter().enumerate() {
        for &variant_b in variants[i+1..].iter() {
            for allele_a in 0..2u8 {
                for allele_b in 0..2u8 {
                    let junction_reads: u64 = intersection_count(
                        evidence.variant(variant_a).allele_reads(allele_a),
                        evidence.variant(variant_b).allele_reads(allele_b)
                    );
                    junctions.push(AlleleJunction {
                        node_a: (variant_a, allele_a),
                        node_b: (variant_b, allele_b),
                        junction_reads,
                        inferred: 0
                    });
                    junctions.push(AlleleJunction {
                        node_a: (variant_a, 1 - allele_a),
                        node_b: (variant_b, 1 - allele_b),
                        junction_reads,
                        inferred: 1
                    });
                }
            }
        }
    }
    junctions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::observations::read_observations;
    use std::io::Cursor;

    fn build_evidence(records: &[(&str, &str, &str, &str)]) -> EvidenceSet {
        let mut evidence = EvidenceSet::new();
        for (read_id, variant_id, allele, genotype) in records.iter() {
            let tsv = format!("{}\t{}\t.\t{}\t60\t{}\tNone\n", read_id, variant_id, allele, genotype);
            let observations = read_observations(Cursor::new(tsv)).unwrap();
            evidence.add_observation(&observations[0], "_").unwrap();
        }
        evidence
    }

    /// Builds two-variant evidence with the requested co-observation counts
    fn paired_evidence(cis: usize, trans: usize, other: usize) -> EvidenceSet {
        let mut records: Vec<(String, &str, &str, &str)> = vec![];
        let mut read_number = 0;
        for _ in 0..cis {
            records.push((format!("c{}", read_number), "chr1_100_A_C", "A", "0|1"));
            records.push((format!("c{}", read_number), "chr1_200_G_T", "G", "0|1"));
            read_number += 1;
        }
        for _ in 0..trans {
            records.push((format!("t{}", read_number), "chr1_100_A_C", "A", "0|1"));
            records.push((format!("t{}", read_number), "chr1_200_G_T", "T", "0|1"));
            read_number += 1;
        }
        for _ in 0..other {
            records.push((format!("o{}", read_number), "chr1_100_A_C", "A", "0|1"));
            records.push((format!("o{}", read_number), "chr1_200_G_T", "N", "0|1"));
            read_number += 1;
        }

        let borrowed: Vec<(&str, &str, &str, &str)> = records.iter()
            .map(|(r, v, a, g)| (r.as_str(), *v, *a, *g))
            .collect();
        build_evidence(&borrowed)
    }

    #[test]
    fn test_build_overlap_map() {
        let evidence = build_evidence(&[
            ("r1", "chr1_100_A_C", "A", "0|1"),
            ("r1", "chr1_200_G_T", "G", "0|1"),
            ("r1", "chr1_300_T_A", "T", "0|1"),
            ("r2", "chr1_300_T_A", "A", "0|1"), // only touches one variant
        ]);
        let overlap_map = build_overlap_map(&evidence, "chr1");
        assert_eq!(overlap_map.len(), 3);
        assert_eq!(overlap_map.get(&0).unwrap().len(), 2);

        let candidates = connection_candidates(&evidence, &overlap_map);
        assert_eq!(candidates, vec![(0, 1), (0, 2), (1, 2)]);
    }

    #[test]
    fn test_clean_connection() {
        // scenario: 10 cis co-observations, no conflicts => trivially passing edge
        let evidence = paired_evidence(10, 0, 0);
        let model = NoiseModel::new(0.01);
        let test = test_variant_connection(&evidence, 0, 1, &model);
        assert_eq!(test.supporting, 10);
        assert_eq!(test.total, 10);
        assert_eq!(test.conflicting_config_p, 1.0);
        assert_eq!(test.configuration, EdgeConfiguration::Cis);
        assert_eq!(test.phase_concordant, Some(true));
    }

    #[test]
    fn test_tied_connection() {
        // scenario: 5 cis and 5 trans reads, no other bases; the chosen configuration is
        // ambiguous, there is no conflicting evidence against it, and the edge passes
        let evidence = paired_evidence(5, 5, 0);
        let model = NoiseModel::new(0.01);
        let test = test_variant_connection(&evidence, 0, 1, &model);
        assert_eq!(test.supporting, 5);
        assert_eq!(test.total, 5);
        assert_eq!(test.conflicting_config_p, 1.0);
        assert_eq!(test.configuration, EdgeConfiguration::Ambiguous);
        assert_eq!(test.phase_concordant, None);
    }

    #[test]
    fn test_tied_connection_with_other_reads() {
        // a tie still gets tested against other-base evidence
        let evidence = paired_evidence(2, 2, 6);
        let model = NoiseModel::new(0.01);
        let test = test_variant_connection(&evidence, 0, 1, &model);
        assert_eq!(test.supporting, 2);
        assert_eq!(test.total, 8);
        assert!(test.conflicting_config_p < 1.0);
    }

    #[test]
    fn test_unsupported_connection() {
        // only other-base co-observations: nothing supports either configuration
        let evidence = paired_evidence(0, 0, 3);
        let model = NoiseModel::new(0.01);
        let test = test_variant_connection(&evidence, 0, 1, &model);
        assert_eq!(test.supporting, 0);
        assert_eq!(test.conflicting_config_p, 0.0);
    }

    #[test]
    fn test_noise_monotonicity() {
        // fixed true signal of 10 supporting reads; adding conflicting evidence must
        // monotonically lower the test probability
        let model = NoiseModel::new(0.01);
        let mut last_p: f64 = 1.0;
        for conflicts in 1..8 {
            let evidence = paired_evidence(10, conflicts, 0);
            let test = test_variant_connection(&evidence, 0, 1, &model);
            assert!(test.conflicting_config_p < last_p);
            last_p = test.conflicting_config_p;
        }
    }

    #[test]
    fn test_trans_concordance() {
        // trans-supported pair whose input phases are also crossed: concordant
        let evidence = build_evidence(&[
            ("r1", "chr1_100_A_C", "A", "0|1"),
            ("r1", "chr1_200_G_T", "T", "1|0"),
        ]);
        let model = NoiseModel::new(0.01);
        let test = test_variant_connection(&evidence, 0, 1, &model);
        assert_eq!(test.configuration, EdgeConfiguration::Trans);
        assert_eq!(test.phase_concordant, Some(true));
    }

    #[test]
    fn test_apply_connection_tests() {
        let evidence = paired_evidence(10, 0, 0);
        let mut overlap_map = build_overlap_map(&evidence, "chr1");
        let mut allele_graph: AlleleGraph = Default::default();
        let model = NoiseModel::new(0.01);

        let passing = test_variant_connection(&evidence, 0, 1, &model);
        let dropped = apply_connection_tests(&mut overlap_map, &mut allele_graph, &[passing], 0.01);
        assert_eq!(dropped, 0);
        // cis configuration materializes both copies in both directions
        assert!(allele_graph.get(&(0, 0)).unwrap().contains(&(1, 0)));
        assert!(allele_graph.get(&(1, 1)).unwrap().contains(&(0, 1)));
        assert!(!allele_graph.get(&(0, 0)).unwrap().contains(&(1, 1)));

        // force a failure and confirm the pair is fully disconnected
        let mut failing = test_variant_connection(&evidence, 0, 1, &model);
        failing.conflicting_config_p = 0.0;
        let dropped = apply_connection_tests(&mut overlap_map, &mut allele_graph, &[failing], 0.01);
        assert_eq!(dropped, 1);
        assert!(overlap_map.is_empty());
    }

    #[test]
    fn test_allele_network() {
        let evidence = paired_evidence(3, 1, 0);
        let junctions = allele_network(&evidence, &[0, 1]);
        // 4 allele combinations, each emitted observed + inferred
        assert_eq!(junctions.len(), 8);
        let observed_00: &AlleleJunction = junctions.iter()
            .find(|j| j.node_a == (0, 0) && j.node_b == (1, 0) && j.inferred == 0)
            .unwrap();
        assert_eq!(observed_00.junction_reads, 3);
    }
}
