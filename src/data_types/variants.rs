
use rustc_hash::FxHashSet as HashSet;

/// Compact read identifier, interned through `evidence::ReadNameTable`
pub type ReadId = u32;

#[derive(thiserror::Error, Debug)]
pub enum VariantError {
    #[error("variant id {unique_id:?} must contain chromosome, position, and at least two alleles")]
    MalformedId { unique_id: String },
    #[error("variant id {unique_id:?} has unparsable position")]
    MalformedPosition { unique_id: String },
    #[error("genotype {genotype:?} for variant {unique_id:?} is not a parsable diploid call")]
    MalformedGenotype { unique_id: String, genotype: String },
    #[error("genotype {genotype:?} for variant {unique_id:?} is not heterozygous")]
    NotHeterozygous { unique_id: String, genotype: String },
    #[error("genotype {genotype:?} for variant {unique_id:?} references allele index {index} but only {num_alleles} alleles are defined")]
    AlleleIndexRange { unique_id: String, genotype: String, index: usize, num_alleles: usize }
}

/// A heterozygous variant definition along with all read evidence attached to it.
/// Identity is the composite key of chromosome, position, and the ordered allele list.
#[derive(Clone, Debug, PartialEq)]
pub struct Variant {
    /// The composite unique id, `{chrom}{sep}{pos}{sep}{allele}...`
    unique_id: String,
    /// External id from the variant file, e.g. an rsID; "." when absent
    rsid: String,
    /// The chromosome name
    chrom: String,
    /// The coordinate of the variant on the chromosome, 1-based
    position: u64,
    /// All alleles defined at this site in order, reference first
    all_alleles: Vec<String>,
    /// The two alleles called for this individual, ordered by allele index
    alleles: [String; 2],
    /// The input (population) phase as an ordered allele pair, if the input call was phased
    input_phase: Option<[String; 2]>,
    /// Minor allele frequency from the input, if provided
    maf: Option<f64>,
    /// Read ids supporting each called allele
    allele_reads: [HashSet<ReadId>; 2],
    /// Read ids matching neither called allele; used only for noise estimation
    other_reads: HashSet<ReadId>,
    /// Genome-wide haplotype assignment per called allele, filled by the anchor
    gw_phase: [Option<u8>; 2],
    /// Confidence of the genome-wide assignment, 0.5 when undetermined
    gw_confidence: f64
}

impl Variant {
    /// Builds a variant definition from its composite id and the individual's genotype string.
    /// # Arguments
    /// * `unique_id` - the composite id, `{chrom}{sep}{pos}{sep}{allele}...`
    /// * `rsid` - the external variant id, "." when absent
    /// * `genotype` - the diploid genotype string, e.g. "0|1" or "1/0"
    /// * `maf` - the minor allele frequency, if the input provides one
    /// * `separator` - the separator used to build `unique_id`; must not occur in chromosome names
    /// # Errors
    /// * if the id does not decompose into chromosome, position, and >= 2 alleles
    /// * if the genotype is not a parsable, heterozygous diploid call
    pub fn from_definition(unique_id: &str, rsid: &str, genotype: &str, maf: Option<f64>, separator: &str) -> Result<Variant, VariantError> {
        let id_fields: Vec<&str> = unique_id.split(separator).collect();
        if id_fields.len() < 4 {
            return Err(VariantError::MalformedId { unique_id: unique_id.to_string() });
        }
        let chrom: String = id_fields[0].to_string();
        let position: u64 = id_fields[1].parse()
            .map_err(|_| VariantError::MalformedPosition { unique_id: unique_id.to_string() })?;
        let all_alleles: Vec<String> = id_fields[2..].iter().map(|s| s.to_string()).collect();

        // the genotype is either phased ("|") or unphased ("/"); anything else is malformed
        let is_phased: bool = genotype.contains('|');
        let gt_fields: Vec<&str> = genotype.split(if is_phased { '|' } else { '/' }).collect();
        if gt_fields.len() != 2 || gt_fields.iter().any(|f| f.is_empty()) {
            return Err(VariantError::MalformedGenotype { unique_id: unique_id.to_string(), genotype: genotype.to_string() });
        }

        let mut gt_indices: [usize; 2] = [0; 2];
        for (i, field) in gt_fields.iter().enumerate() {
            gt_indices[i] = field.parse()
                .map_err(|_| VariantError::MalformedGenotype { unique_id: unique_id.to_string(), genotype: genotype.to_string() })?;
            if gt_indices[i] >= all_alleles.len() {
                return Err(VariantError::AlleleIndexRange {
                    unique_id: unique_id.to_string(), genotype: genotype.to_string(),
                    index: gt_indices[i], num_alleles: all_alleles.len()
                });
            }
        }
        if gt_indices[0] == gt_indices[1] {
            return Err(VariantError::NotHeterozygous { unique_id: unique_id.to_string(), genotype: genotype.to_string() });
        }

        // called alleles are stored ordered by allele index, independent of the genotype order
        let low_index: usize = gt_indices[0].min(gt_indices[1]);
        let high_index: usize = gt_indices[0].max(gt_indices[1]);
        let alleles: [String; 2] = [all_alleles[low_index].clone(), all_alleles[high_index].clone()];

        // the input phase preserves the genotype order
        let input_phase: Option<[String; 2]> = if is_phased {
            Some([all_alleles[gt_indices[0]].clone(), all_alleles[gt_indices[1]].clone()])
        } else {
            None
        };

        Ok(Variant {
            unique_id: unique_id.to_string(),
            rsid: rsid.to_string(),
            chrom,
            position,
            all_alleles,
            alleles,
            input_phase,
            maf,
            allele_reads: [Default::default(), Default::default()],
            other_reads: Default::default(),
            gw_phase: [None, None],
            gw_confidence: 0.5
        })
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn rsid(&self) -> &str {
        &self.rsid
    }

    pub fn chrom(&self) -> &str {
        &self.chrom
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn reference_allele(&self) -> &str {
        &self.all_alleles[0]
    }

    /// Returns the called allele sequence for a haplotype-local allele index (0 or 1)
    pub fn allele(&self, allele_index: u8) -> &str {
        &self.alleles[allele_index as usize]
    }

    /// Returns the local index (0 or 1) of an observed allele sequence, or None for any other base
    pub fn allele_index(&self, observed: &str) -> Option<u8> {
        self.alleles.iter().position(|a| a == observed).map(|i| i as u8)
    }

    pub fn maf(&self) -> Option<f64> {
        self.maf
    }

    pub fn is_input_phased(&self) -> bool {
        self.input_phase.is_some()
    }

    /// Returns the input-phase bit for a called allele: 0 if the allele is on the first
    /// input haplotype, 1 if on the second, None when the input call was unphased.
    pub fn input_phase_bit(&self, allele_index: u8) -> Option<u8> {
        let phase = self.input_phase.as_ref()?;
        let allele = &self.alleles[allele_index as usize];
        phase.iter().position(|a| a == allele).map(|i| i as u8)
    }

    pub fn add_allele_read(&mut self, allele_index: u8, read_id: ReadId) {
        self.allele_reads[allele_index as usize].insert(read_id);
    }

    pub fn add_other_read(&mut self, read_id: ReadId) {
        self.other_reads.insert(read_id);
    }

    pub fn allele_reads(&self, allele_index: u8) -> &HashSet<ReadId> {
        &self.allele_reads[allele_index as usize]
    }

    pub fn other_reads(&self) -> &HashSet<ReadId> {
        &self.other_reads
    }

    /// Total number of reads matching either called allele
    pub fn matching_read_count(&self) -> usize {
        self.allele_reads[0].len() + self.allele_reads[1].len()
    }

    pub fn other_read_count(&self) -> usize {
        self.other_reads.len()
    }

    /// Sets the genome-wide phase for both called alleles at once.
    /// # Arguments
    /// * `allele0_bit` - the genome-wide haplotype (0 or 1) assigned to called allele 0; allele 1 gets the complement
    /// * `confidence` - the anchoring confidence, in [0.5, 1.0]
    pub fn set_gw_phase(&mut self, allele0_bit: u8, confidence: f64) {
        self.gw_phase = [Some(allele0_bit), Some(1 - allele0_bit)];
        self.gw_confidence = confidence;
    }

    pub fn gw_phase_bit(&self, allele_index: u8) -> Option<u8> {
        self.gw_phase[allele_index as usize]
    }

    pub fn gw_confidence(&self) -> f64 {
        self.gw_confidence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_definition() {
        let variant = Variant::from_definition("chr1_100_A_C", "rs123", "0|1", Some(0.25), "_").unwrap();
        assert_eq!(variant.chrom(), "chr1");
        assert_eq!(variant.position(), 100);
        assert_eq!(variant.reference_allele(), "A");
        assert_eq!(variant.allele(0), "A");
        assert_eq!(variant.allele(1), "C");
        assert_eq!(variant.allele_index("C"), Some(1));
        assert_eq!(variant.allele_index("G"), None);
        assert_eq!(variant.maf(), Some(0.25));
        assert!(variant.is_input_phased());
        assert_eq!(variant.input_phase_bit(0), Some(0));
        assert_eq!(variant.input_phase_bit(1), Some(1));
    }

    #[test]
    fn test_reversed_phase() {
        // genotype "1|0": allele 0 (REF) is on the second input haplotype
        let variant = Variant::from_definition("chr2_500_G_T", ".", "1|0", None, "_").unwrap();
        assert_eq!(variant.allele(0), "G");
        assert_eq!(variant.allele(1), "T");
        assert_eq!(variant.input_phase_bit(0), Some(1));
        assert_eq!(variant.input_phase_bit(1), Some(0));
    }

    #[test]
    fn test_unphased_genotype() {
        let variant = Variant::from_definition("chr2_500_G_T", ".", "0/1", None, "_").unwrap();
        assert!(!variant.is_input_phased());
        assert_eq!(variant.input_phase_bit(0), None);
    }

    #[test]
    fn test_multiallelic_definition() {
        // genotype 1|2 at a tri-allelic site: called alleles are ALT1 and ALT2
        let variant = Variant::from_definition("chr3_42_A_C_T", ".", "1|2", None, "_").unwrap();
        assert_eq!(variant.reference_allele(), "A");
        assert_eq!(variant.allele(0), "C");
        assert_eq!(variant.allele(1), "T");
        assert_eq!(variant.allele_index("A"), None);
    }

    #[test]
    fn test_malformed_definitions() {
        assert!(Variant::from_definition("chr1_100_A", ".", "0|1", None, "_").is_err());
        assert!(Variant::from_definition("chr1_x_A_C", ".", "0|1", None, "_").is_err());
        assert!(Variant::from_definition("chr1_100_A_C", ".", "0|0", None, "_").is_err());
        assert!(Variant::from_definition("chr1_100_A_C", ".", "0|2", None, "_").is_err());
        assert!(Variant::from_definition("chr1_100_A_C", ".", ".|1", None, "_").is_err());
    }

    #[test]
    fn test_read_tracking() {
        let mut variant = Variant::from_definition("chr1_100_A_C", ".", "0|1", None, "_").unwrap();
        variant.add_allele_read(0, 1);
        variant.add_allele_read(0, 1);
        variant.add_allele_read(1, 2);
        variant.add_other_read(3);
        assert_eq!(variant.matching_read_count(), 2);
        assert_eq!(variant.other_read_count(), 1);
    }
}
