
use serde::Serialize;
use std::fs::File;
use std::path::Path;

use crate::anchor::AnchorResult;
use crate::data_types::variants::ReadId;
use crate::evidence::EvidenceSet;
use crate::phaser::PhaseFragment;
use rustc_hash::FxHashSet as HashSet;

/// This is a wrapper for writing per-haplotype read counts for ASE analysis
pub struct CountsWriter {
    /// Handle for the CSV writer
    csv_writer: csv::Writer<File>
}

/// Contains all the data written to each row of our haplotypic counts file
#[derive(Serialize)]
struct CountsRow {
    /// the chromosome of the fragment
    contig: String,
    /// the position of the first variant
    start: u64,
    /// the position of the last variant
    stop: u64,
    /// comma-joined composite variant ids
    variants: String,
    /// the number of variants in the fragment
    variant_count: usize,
    /// the allele sequences on haplotype A
    haplotype_a: String,
    /// the allele sequences on haplotype B
    haplotype_b: String,
    /// distinct reads supporting haplotype A
    a_count: usize,
    /// distinct reads supporting haplotype B
    b_count: usize,
    /// total distinct supporting reads
    total_count: usize,
    /// the genome-wide phase of the fragment
    block_gw_phase: String,
    /// the genome-wide anchoring confidence
    gw_stat: f64
}

/// Collects the distinct reads on one haplotype of a fragment
fn haplotype_reads(evidence: &EvidenceSet, fragment: &PhaseFragment, hap_index: usize) -> HashSet<ReadId> {
    let bits: &[u8] = if hap_index == 0 { &fragment.haplotype_1 } else { &fragment.haplotype_2 };
    let mut reads: HashSet<ReadId> = Default::default();
    for (&variant_index, &bit) in fragment.variants.iter().zip(bits.iter()) {
        reads.extend(evidence.variant(variant_index).allele_reads(bit).iter());
    }
    reads
}

impl CountsWriter {
    /// Creates a new writer for a given filename
    /// # Arguments
    /// * `filename` - the path to write all counts to
    pub fn new(filename: &Path) -> csv::Result<CountsWriter> {
        // modify the delimiter to "," if it ends with .csv
        let is_csv: bool = filename.extension().unwrap_or_default() == "csv";
        let delimiter: u8 = if is_csv { b',' } else { b'\t' };
        let csv_writer: csv::Writer<File> = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_path(filename)?;
        Ok(CountsWriter {
            csv_writer
        })
    }

    /// Writes the haplotypic read counts for one resolved fragment.
    /// # Arguments
    /// * `evidence` - the evidence set
    /// * `fragment` - the resolved fragment
    /// * `anchor` - the fragment's genome-wide anchoring outcome
    /// # Errors
    /// * if the csv_writer has any errors
    pub fn write_fragment(
        &mut self,
        evidence: &EvidenceSet,
        fragment: &PhaseFragment,
        anchor: &AnchorResult
    ) -> Result<(), Box<dyn std::error::Error>> {
        let first = evidence.variant(fragment.variants[0]);
        let last = evidence.variant(*fragment.variants.last().unwrap());

        let variants: String = fragment.variants.iter()
            .map(|&v| evidence.variant(v).unique_id())
            .collect::<Vec<&str>>()
            .join(",");
        let hap_alleles = |bits: &[u8]| -> String {
            fragment.variants.iter().zip(bits.iter())
                .map(|(&v, &b)| evidence.variant(v).allele(b))
                .collect::<Vec<&str>>()
                .join(",")
        };

        let a_count: usize = haplotype_reads(evidence, fragment, 0).len();
        let b_count: usize = haplotype_reads(evidence, fragment, 1).len();

        let row: CountsRow = CountsRow {
            contig: first.chrom().to_string(),
            start: first.position(),
            stop: last.position(),
            variants,
            variant_count: fragment.variants.len(),
            haplotype_a: hap_alleles(&fragment.haplotype_1),
            haplotype_b: hap_alleles(&fragment.haplotype_2),
            a_count,
            b_count,
            total_count: a_count + b_count,
            block_gw_phase: anchor.orientation.block_phase_string().to_string(),
            gw_stat: anchor.confidence
        };
        self.csv_writer.serialize(&row)?;
        Ok(())
    }

    /// Writes the counts for one unphased singleton variant: its two allele read sets
    /// become the two "haplotypes" with confidence pinned at 1.
    /// # Arguments
    /// * `evidence` - the evidence set
    /// * `variant_index` - the singleton variant
    /// # Errors
    /// * if the csv_writer has any errors
    pub fn write_singleton(&mut self, evidence: &EvidenceSet, variant_index: usize) -> Result<(), Box<dyn std::error::Error>> {
        let variant = evidence.variant(variant_index);
        let phase_string: String = match (variant.input_phase_bit(0), variant.input_phase_bit(1)) {
            (Some(bit_a), Some(bit_b)) => format!("{}|{}", bit_a, bit_b),
            _ => "0/1".to_string()
        };
        let a_count: usize = variant.allele_reads(0).len();
        let b_count: usize = variant.allele_reads(1).len();

        let row: CountsRow = CountsRow {
            contig: variant.chrom().to_string(),
            start: variant.position(),
            stop: variant.position(),
            variants: variant.unique_id().to_string(),
            variant_count: 1,
            haplotype_a: variant.allele(0).to_string(),
            haplotype_b: variant.allele(1).to_string(),
            a_count,
            b_count,
            total_count: a_count + b_count,
            block_gw_phase: phase_string,
            gw_stat: 1.0
        };
        self.csv_writer.serialize(&row)?;
        Ok(())
    }

    /// Flushes any buffered rows to disk
    pub fn flush(&mut self) -> csv::Result<()> {
        Ok(self.csv_writer.flush()?)
    }
}

/// This is a wrapper for writing per-variant allele coverage, one row per covered variant
pub struct AllelicCountsWriter {
    /// Handle for the CSV writer
    csv_writer: csv::Writer<File>
}

/// Contains all the data written to each row of our allelic counts file
#[derive(Serialize)]
struct AllelicCountsRow {
    /// the chromosome of the variant
    contig: String,
    /// the position of the variant
    position: u64,
    /// The composite variant id
    variant_id: String,
    /// the first called allele
    ref_allele: String,
    /// the second called allele
    alt_allele: String,
    /// reads supporting the first called allele
    ref_count: usize,
    /// reads supporting the second called allele
    alt_count: usize,
    /// total supporting reads
    total_count: usize
}

impl AllelicCountsWriter {
    /// Creates a new writer for a given filename
    /// # Arguments
    /// * `filename` - the path to write all counts to
    pub fn new(filename: &Path) -> csv::Result<AllelicCountsWriter> {
        // modify the delimiter to "," if it ends with .csv
        let is_csv: bool = filename.extension().unwrap_or_default() == "csv";
        let delimiter: u8 = if is_csv { b',' } else { b'\t' };
        let csv_writer: csv::Writer<File> = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_path(filename)?;
        Ok(AllelicCountsWriter {
            csv_writer
        })
    }

    /// Writes the allele coverage for one variant.
    /// # Arguments
    /// * `evidence` - the evidence set
    /// * `variant_index` - the variant to report
    /// # Errors
    /// * if the csv_writer has any errors
    pub fn write_variant(&mut self, evidence: &EvidenceSet, variant_index: usize) -> Result<(), Box<dyn std::error::Error>> {
        let variant = evidence.variant(variant_index);
        let ref_count: usize = variant.allele_reads(0).len();
        let alt_count: usize = variant.allele_reads(1).len();
        let row: AllelicCountsRow = AllelicCountsRow {
            contig: variant.chrom().to_string(),
            position: variant.position(),
            variant_id: variant.unique_id().to_string(),
            ref_allele: variant.allele(0).to_string(),
            alt_allele: variant.allele(1).to_string(),
            ref_count,
            alt_count,
            total_count: ref_count + alt_count
        };
        self.csv_writer.serialize(&row)?;
        Ok(())
    }

    /// Flushes any buffered rows to disk
    pub fn flush(&mut self) -> csv::Result<()> {
        Ok(self.csv_writer.flush()?)
    }
}
