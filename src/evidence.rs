
use crate::data_types::observations::AlleleObservation;
use crate::data_types::variants::{ReadId, Variant, VariantError};

use log::debug;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};

/// Variants with at least this fraction of unmatched reads are excluded from the noise
/// estimate, since the mismatches are more likely a genotyping error than sequencing noise.
const NOISE_EXCLUSION_FRACTION: f64 = 0.5;

#[derive(thiserror::Error, Debug)]
pub enum EvidenceError {
    #[error("no reads could be matched to any variant allele; check that observation inputs are non-empty and filters are not too strict")]
    NoMatchingReads,
    #[error("no usable heterozygous variants were loaded from the observation inputs")]
    NoUsableVariants
}

/// Interns read names into compact integer ids so read sets can be compared cheaply.
#[derive(Default)]
pub struct ReadNameTable {
    /// Read names in id order
    names: Vec<String>,
    /// Reverse lookup from name to id
    lookup: HashMap<String, ReadId>
}

impl ReadNameTable {
    /// Returns the id for a read name, assigning a new one on first sight
    pub fn intern(&mut self, name: &str) -> ReadId {
        if let Some(&read_id) = self.lookup.get(name) {
            read_id
        } else {
            let read_id: ReadId = self.names.len() as ReadId;
            self.names.push(name.to_string());
            self.lookup.insert(name.to_string(), read_id);
            read_id
        }
    }

    pub fn name(&self, read_id: ReadId) -> &str {
        &self.names[read_id as usize]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Owns all evidence gathered from the observation inputs: the variant table, the interned
/// read names, and the per-chromosome lookup from read to the variants it touched.
/// This is the context object handed (read-only) to the downstream components.
#[derive(Default)]
pub struct EvidenceSet {
    /// All variants in creation order; indices into this Vec are the run-wide variant ids
    variants: Vec<Variant>,
    /// Lookup from composite unique id to variant index
    variant_lookup: HashMap<String, usize>,
    /// Interned read names
    read_names: ReadNameTable,
    /// Per chromosome: which variants each read touched, in observation order
    read_variants: HashMap<String, HashMap<ReadId, Vec<usize>>>
}

impl EvidenceSet {
    pub fn new() -> EvidenceSet {
        Self::default()
    }

    /// Folds a single observation into the evidence. The variant is created on first sight;
    /// the read lands in the matching allele set or the "other" set.
    /// # Arguments
    /// * `observation` - the observation to fold in
    /// * `separator` - the id separator used to decompose composite variant ids
    /// # Errors
    /// * if a new variant id or genotype fails to parse
    pub fn add_observation(&mut self, observation: &AlleleObservation, separator: &str) -> Result<(), VariantError> {
        let variant_index: usize = match self.variant_lookup.get(&observation.variant_id) {
            Some(&index) => index,
            None => {
                let variant = Variant::from_definition(
                    &observation.variant_id,
                    &observation.rsid,
                    &observation.genotype,
                    observation.maf(),
                    separator
                )?;
                let index: usize = self.variants.len();
                self.variant_lookup.insert(observation.variant_id.clone(), index);
                self.variants.push(variant);
                index
            }
        };

        let read_id: ReadId = self.read_names.intern(&observation.read_id);
        let variant: &mut Variant = &mut self.variants[variant_index];
        match variant.allele_index(&observation.observed_allele) {
            Some(allele_index) => variant.add_allele_read(allele_index, read_id),
            None => variant.add_other_read(read_id)
        };
        let chrom: String = variant.chrom().to_string();

        // track which variants this read touched; mates of a pair share a read id, so the
        // same variant can arrive twice for one id
        let chrom_reads = self.read_variants.entry(chrom).or_default();
        let touched = chrom_reads.entry(read_id).or_default();
        if !touched.contains(&variant_index) {
            touched.push(variant_index);
        }
        Ok(())
    }

    pub fn num_variants(&self) -> usize {
        self.variants.len()
    }

    pub fn variant(&self, variant_index: usize) -> &Variant {
        &self.variants[variant_index]
    }

    pub fn variant_mut(&mut self, variant_index: usize) -> &mut Variant {
        &mut self.variants[variant_index]
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn variant_index(&self, unique_id: &str) -> Option<usize> {
        self.variant_lookup.get(unique_id).copied()
    }

    pub fn read_name(&self, read_id: ReadId) -> &str {
        self.read_names.name(read_id)
    }

    pub fn num_reads(&self) -> usize {
        self.read_names.len()
    }

    /// Returns all chromosomes with evidence, sorted for deterministic traversal
    pub fn chromosomes(&self) -> Vec<String> {
        let mut chromosomes: Vec<String> = self.read_variants.keys().cloned().collect();
        chromosomes.sort();
        chromosomes
    }

    /// Returns the read-to-variants lookup for one chromosome, if any reads landed there
    pub fn chromosome_read_variants(&self, chrom: &str) -> Option<&HashMap<ReadId, Vec<usize>>> {
        self.read_variants.get(chrom)
    }

    /// Frees the read-to-variants lookups once the connectivity graph has been built
    pub fn clear_read_variants(&mut self) {
        self.read_variants.clear();
        self.read_variants.shrink_to_fit();
    }
}

/// Computes the genome-wide base-error rate from reads that matched neither called allele.
/// Variants dominated by unmatched reads are excluded as likely genotyping errors.
/// # Arguments
/// * `evidence` - the aggregated evidence
/// # Errors
/// * `EvidenceError::NoMatchingReads` - if no read matched any variant allele
pub fn estimate_noise(evidence: &EvidenceSet) -> Result<f64, EvidenceError> {
    let mut base_match_count: u64 = 0;
    let mut base_mismatch_count: u64 = 0;

    for variant in evidence.variants().iter() {
        let matches: u64 = variant.matching_read_count() as u64;
        let mismatches: u64 = variant.other_read_count() as u64;
        if matches > 0 && (mismatches as f64 / (matches + mismatches) as f64) < NOISE_EXCLUSION_FRACTION {
            base_match_count += matches;
            base_mismatch_count += mismatches;
        }
    }

    if base_match_count == 0 {
        return Err(EvidenceError::NoMatchingReads);
    }

    // each overlap offers two per-base error opportunities, hence the doubled denominator
    let noise_rate: f64 = base_mismatch_count as f64 / (2.0 * (base_match_count + base_mismatch_count) as f64);
    debug!("noise estimate: {} matching, {} other => e = {}", base_match_count, base_mismatch_count, noise_rate);
    Ok(noise_rate)
}

/// Selects the variants to drop from working memory after edge testing.
/// With unphased output enabled, only zero-coverage variants are dropped; otherwise every
/// variant without a surviving connection goes.
/// # Arguments
/// * `evidence` - the aggregated evidence
/// * `connected_variants` - the variants that still carry at least one surviving edge
/// * `output_unphased` - whether unphased singletons will be reported downstream
pub fn select_dropped_variants(
    evidence: &EvidenceSet,
    connected_variants: &HashSet<usize>,
    output_unphased: bool
) -> Vec<usize> {
    let mut dropped: Vec<usize> = vec![];
    for (variant_index, variant) in evidence.variants().iter().enumerate() {
        let drop = if output_unphased {
            variant.matching_read_count() == 0
        } else {
            !connected_variants.contains(&variant_index)
        };
        if drop {
            dropped.push(variant_index);
        }
    }
    dropped
}
