
use serde::Serialize;
use std::fs::File;
use std::path::Path;

use crate::anchor::AnchorResult;
use crate::connectivity::AlleleGraph;
use crate::data_types::variants::ReadId;
use crate::evidence::EvidenceSet;
use crate::phaser::PhaseFragment;
use rustc_hash::FxHashSet as HashSet;

/// This is a wrapper for writing the resolved haplotype fragments to a file
pub struct HaplotypeWriter {
    /// Handle for the CSV writer
    csv_writer: csv::Writer<File>
}

/// Contains all the data written to each row of our haplotypes file
#[derive(Serialize)]
struct HaplotypeRow {
    /// the chromosome of the fragment
    contig: String,
    /// the position of the first variant
    start: u64,
    /// the position of the last variant
    stop: u64,
    /// the number of variants in the fragment
    variants: usize,
    /// comma-joined composite variant ids
    variant_ids: String,
    /// the allele sequences on each haplotype, "A,G|C,T"
    variant_alleles: String,
    /// distinct reads supporting haplotype A
    reads_hap_a: usize,
    /// distinct reads supporting haplotype B
    reads_hap_b: usize,
    /// total distinct supporting reads
    reads_total: usize,
    /// allele connections satisfied by this phasing
    edges_supporting: u64,
    /// allele connections involving the fragment's variants
    edges_total: u64,
    /// the input phase per haplotype, "-" where unphased
    annotated_phase: String,
    /// "1" if every known input phase agrees with haplotype A, "0" otherwise
    phase_concordant: String,
    /// the genome-wide phase of the fragment
    gw_phase: String,
    /// the genome-wide anchoring confidence; empty for singletons
    gw_confidence: Option<f64>
}

/// Counts the distinct reads supporting one haplotype of a fragment
fn haplotype_read_count(evidence: &EvidenceSet, fragment: &PhaseFragment, hap_index: usize) -> usize {
    let bits: &[u8] = if hap_index == 0 { &fragment.haplotype_1 } else { &fragment.haplotype_2 };
    let mut reads: HashSet<ReadId> = Default::default();
    for (&variant_index, &bit) in fragment.variants.iter().zip(bits.iter()) {
        reads.extend(evidence.variant(variant_index).allele_reads(bit).iter());
    }
    reads.len()
}

/// Renders the input phase of one haplotype as a "0"/"1"/"-" string
fn input_phase_string(evidence: &EvidenceSet, fragment: &PhaseFragment, hap_index: usize) -> String {
    let bits: &[u8] = if hap_index == 0 { &fragment.haplotype_1 } else { &fragment.haplotype_2 };
    fragment.variants.iter().zip(bits.iter())
        .map(|(&variant_index, &bit)| match evidence.variant(variant_index).input_phase_bit(bit) {
            Some(phase_bit) => char::from(b'0' + phase_bit),
            None => '-'
        })
        .collect()
}

/// Counts the allele connections satisfied by the fragment's phasing and the total
/// connections among its variants; both are unordered pair counts.
fn connection_counts(allele_graph: &AlleleGraph, fragment: &PhaseFragment) -> (u64, u64) {
    let mut supporting: u64 = 0;
    let mut total: u64 = 0;
    for (i, &variant_i) in fragment.variants.iter().enumerate() {
        let node = (variant_i, fragment.haplotype_1[i]);
        if let Some(connected) = allele_graph.get(&node) {
            for (j, &variant_j) in fragment.variants.iter().enumerate() {
                if j == i {
                    continue;
                }
                if connected.contains(&(variant_j, fragment.haplotype_1[j])) {
                    supporting += 1;
                }
                total += connected.contains(&(variant_j, 0)) as u64;
                total += connected.contains(&(variant_j, 1)) as u64;
            }
        }
    }
    // every pair was seen from both ends
    (supporting / 2, total / 2)
}

impl HaplotypeWriter {
    /// Creates a new writer for a given filename
    /// # Arguments
    /// * `filename` - the path to write all fragments to
    pub fn new(filename: &Path) -> csv::Result<HaplotypeWriter> {
        // modify the delimiter to "," if it ends with .csv
        let is_csv: bool = filename.extension().unwrap_or_default() == "csv";
        let delimiter: u8 = if is_csv { b',' } else { b'\t' };
        let csv_writer: csv::Writer<File> = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_path(filename)?;
        Ok(HaplotypeWriter {
            csv_writer
        })
    }

    /// Writes one resolved fragment.
    /// # Arguments
    /// * `evidence` - the evidence set
    /// * `allele_graph` - the surviving allele connectivity, for edge counts
    /// * `fragment` - the resolved fragment
    /// * `anchor` - the fragment's genome-wide anchoring outcome
    /// # Errors
    /// * if the csv_writer has any errors
    pub fn write_fragment(
        &mut self,
        evidence: &EvidenceSet,
        allele_graph: &AlleleGraph,
        fragment: &PhaseFragment,
        anchor: &AnchorResult
    ) -> Result<(), Box<dyn std::error::Error>> {
        let first = evidence.variant(fragment.variants[0]);
        let last = evidence.variant(*fragment.variants.last().unwrap());

        let variant_ids: String = fragment.variants.iter()
            .map(|&v| evidence.variant(v).unique_id())
            .collect::<Vec<&str>>()
            .join(",");
        let hap_alleles = |bits: &[u8]| -> String {
            fragment.variants.iter().zip(bits.iter())
                .map(|(&v, &b)| evidence.variant(v).allele(b))
                .collect::<Vec<&str>>()
                .join(",")
        };

        let reads_hap_a: usize = haplotype_read_count(evidence, fragment, 0);
        let reads_hap_b: usize = haplotype_read_count(evidence, fragment, 1);
        let (edges_supporting, edges_total) = connection_counts(allele_graph, fragment);

        let phase_a: String = input_phase_string(evidence, fragment, 0);
        let phase_b: String = input_phase_string(evidence, fragment, 1);
        // concordant means every variant with known input phase voted the same way
        let known_bits: HashSet<char> = phase_a.chars().filter(|&c| c != '-').collect();
        let phase_concordant: String = if known_bits.len() <= 1 { "1".to_string() } else { "0".to_string() };

        let row: HaplotypeRow = HaplotypeRow {
            contig: first.chrom().to_string(),
            start: first.position(),
            stop: last.position(),
            variants: fragment.variants.len(),
            variant_ids,
            variant_alleles: format!("{}|{}", hap_alleles(&fragment.haplotype_1), hap_alleles(&fragment.haplotype_2)),
            reads_hap_a,
            reads_hap_b,
            reads_total: reads_hap_a + reads_hap_b,
            edges_supporting,
            edges_total,
            annotated_phase: format!("{}|{}", phase_a, phase_b),
            phase_concordant,
            gw_phase: anchor.orientation.block_phase_string().to_string(),
            gw_confidence: Some(anchor.confidence)
        };
        self.csv_writer.serialize(&row)?;
        Ok(())
    }

    /// Writes one unphased singleton variant.
    /// # Arguments
    /// * `evidence` - the evidence set
    /// * `variant_index` - the singleton variant
    /// # Errors
    /// * if the csv_writer has any errors
    pub fn write_singleton(&mut self, evidence: &EvidenceSet, variant_index: usize) -> Result<(), Box<dyn std::error::Error>> {
        let variant = evidence.variant(variant_index);
        let phase_string: String = match (variant.input_phase_bit(0), variant.input_phase_bit(1)) {
            (Some(bit_a), Some(bit_b)) => format!("{}|{}", bit_a, bit_b),
            _ => "-|-".to_string()
        };
        let row: HaplotypeRow = HaplotypeRow {
            contig: variant.chrom().to_string(),
            start: variant.position(),
            stop: variant.position(),
            variants: 1,
            variant_ids: variant.unique_id().to_string(),
            variant_alleles: format!("{}|{}", variant.allele(0), variant.allele(1)),
            reads_hap_a: variant.allele_reads(0).len(),
            reads_hap_b: variant.allele_reads(1).len(),
            reads_total: variant.matching_read_count(),
            edges_supporting: 0,
            edges_total: 0,
            annotated_phase: phase_string.clone(),
            phase_concordant: ".".to_string(),
            gw_phase: phase_string,
            gw_confidence: None
        };
        self.csv_writer.serialize(&row)?;
        Ok(())
    }

    /// Flushes any buffered rows to disk
    pub fn flush(&mut self) -> csv::Result<()> {
        Ok(self.csv_writer.flush()?)
    }
}

/// This is a wrapper for writing the per-variant phase annotations used downstream for
/// VCF annotation, keyed by composite variant id
pub struct PhaseAnnotationWriter {
    /// Handle for the CSV writer
    csv_writer: csv::Writer<File>,
    /// Minimum anchoring confidence before the genome-wide phase overwrites the input phase
    min_confidence: f64
}

/// Contains all the data written to each row of our annotation file
#[derive(Serialize)]
struct PhaseAnnotationRow {
    /// The composite variant id
    variant_id: String,
    /// External id, "." when absent
    rsid: String,
    /// the chromosome of the variant
    contig: String,
    /// the position of the variant
    position: u64,
    /// The fragment this variant was phased into
    fragment_id: usize,
    /// Local block phase: allele bits on haplotype A | haplotype B
    block_phase: String,
    /// Genome-wide phase of this variant, "0/1" when undetermined
    gw_phase: String,
    /// Genome-wide anchoring confidence
    gw_confidence: f64,
    /// The phase selected for annotation after applying the confidence threshold
    output_phase: String
}

impl PhaseAnnotationWriter {
    /// Creates a new writer for a given filename
    /// # Arguments
    /// * `filename` - the path to write all annotations to
    /// * `min_confidence` - the minimum confidence for the genome-wide phase to overwrite the input phase
    pub fn new(filename: &Path, min_confidence: f64) -> csv::Result<PhaseAnnotationWriter> {
        // modify the delimiter to "," if it ends with .csv
        let is_csv: bool = filename.extension().unwrap_or_default() == "csv";
        let delimiter: u8 = if is_csv { b',' } else { b'\t' };
        let csv_writer: csv::Writer<File> = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_path(filename)?;
        Ok(PhaseAnnotationWriter {
            csv_writer,
            min_confidence
        })
    }

    /// Writes the annotation rows for every variant of a resolved fragment.
    /// # Arguments
    /// * `evidence` - the evidence set
    /// * `fragment` - the resolved fragment
    /// * `fragment_id` - the run-wide fragment index
    /// # Errors
    /// * if the csv_writer has any errors
    pub fn write_fragment(
        &mut self,
        evidence: &EvidenceSet,
        fragment: &PhaseFragment,
        fragment_id: usize
    ) -> Result<(), Box<dyn std::error::Error>> {
        for (position_in_fragment, &variant_index) in fragment.variants.iter().enumerate() {
            let variant = evidence.variant(variant_index);
            let hap_a_bit: u8 = fragment.haplotype_1[position_in_fragment];

            let gw_phase: String = match variant.gw_phase_bit(0) {
                Some(allele0_bit) => format!("{}|{}", allele0_bit, 1 - allele0_bit),
                None => "0/1".to_string()
            };
            let input_phase: Option<String> = variant.input_phase_bit(0)
                .map(|bit| format!("{}|{}", bit, 1 - bit));

            // the genome-wide phase only overwrites a known input phase when it is
            // confident enough
            let output_phase: String = if variant.gw_phase_bit(0).is_some()
                && (variant.gw_confidence() >= self.min_confidence || input_phase.is_none()) {
                gw_phase.clone()
            } else {
                input_phase.unwrap_or_else(|| "0/1".to_string())
            };

            let row: PhaseAnnotationRow = PhaseAnnotationRow {
                variant_id: variant.unique_id().to_string(),
                rsid: variant.rsid().to_string(),
                contig: variant.chrom().to_string(),
                position: variant.position(),
                fragment_id,
                block_phase: format!("{}|{}", hap_a_bit, 1 - hap_a_bit),
                gw_phase,
                gw_confidence: variant.gw_confidence(),
                output_phase
            };
            self.csv_writer.serialize(&row)?;
        }
        Ok(())
    }

    /// Flushes any buffered rows to disk
    pub fn flush(&mut self) -> csv::Result<()> {
        Ok(self.csv_writer.flush()?)
    }
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

    #[test]
    fn test_haplotype_read_counts() {
        let evidence = build_evidence(&[
            ("r1", "chr1_100_A_C", "A", "0|1"),
            ("r1", "chr1_200_G_T", "G", "0|1"),
            ("r2", "chr1_100_A_C", "C", "0|1"),
            ("r3", "chr1_200_G_T", "T", "0|1"),
        ]);
        let fragment = PhaseFragment {
            variants: vec![0, 1],
            haplotype_1: vec![0, 0],
            haplotype_2: vec![1, 1]
        };
        // r1 spans both hap-A alleles and is counted once
        assert_eq!(haplotype_read_count(&evidence, &fragment, 0), 1);
        assert_eq!(haplotype_read_count(&evidence, &fragment, 1), 2);
        assert_eq!(input_phase_string(&evidence, &fragment, 0), "00");
        assert_eq!(input_phase_string(&evidence, &fragment, 1), "11");
    }

    #[test]
    fn test_connection_counts() {
        let mut allele_graph: AlleleGraph = Default::default();
        for (a, b) in [((0usize, 0u8), (1usize, 0u8)), ((0, 1), (1, 1))] {
            allele_graph.entry(a).or_default().insert(b);
            allele_graph.entry(b).or_default().insert(a);
        }
        let fragment = PhaseFragment {
            variants: vec![0, 1],
            haplotype_1: vec![0, 0],
            haplotype_2: vec![1, 1]
        };
        let (supporting, total) = connection_counts(&allele_graph, &fragment);
        assert_eq!(supporting, 1);
        assert_eq!(total, 1);

        // a flipped assignment satisfies nothing but the connection still counts
        let flipped = PhaseFragment {
            variants: vec![0, 1],
            haplotype_1: vec![0, 1],
            haplotype_2: vec![1, 0]
        };
        let (supporting, total) = connection_counts(&allele_graph, &flipped);
        assert_eq!(supporting, 0);
        assert_eq!(total, 1);
    }
}
