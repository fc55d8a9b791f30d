
use crate::evidence::EvidenceSet;
use crate::phaser::PhaseFragment;

use flate2::bufread::MultiGzDecoder;
use log::debug;
use rustc_hash::FxHashMap as HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// The method used to orient a fragment's arbitrary A/B labeling genome-wide
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PhaseMethod {
    /// Use the most common input phase across the fragment
    Majority,
    /// Weight each variant's vote by its minor allele frequency
    MafWeighted
}

/// The genome-wide orientation chosen for a fragment
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Orientation {
    /// Haplotype A is genome-wide haplotype 0
    AsLabeled,
    /// Haplotype A is genome-wide haplotype 1
    Flipped,
    /// No input phase information was available
    Undetermined
}

impl Orientation {
    /// Renders the block-level genome-wide phase the way it lands in the output,
    /// "0|1" when haplotype A is genome-wide 0, "0/1" when undetermined
    pub fn block_phase_string(&self) -> &'static str {
        match self {
            Orientation::AsLabeled => "0|1",
            Orientation::Flipped => "1|0",
            Orientation::Undetermined => "0/1"
        }
    }
}

/// The anchoring outcome for one fragment
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnchorResult {
    pub orientation: Orientation,
    /// Confidence of the orientation, in [0.5, 1.0]
    pub confidence: f64
}

/// Population allele frequencies keyed by genomic coordinate, for MAF-weighted anchoring
#[derive(Default)]
pub struct FrequencyTable {
    frequencies: HashMap<(String, u64), f64>
}

impl FrequencyTable {
    /// Loads a frequency table from a tab-separated file with columns (chrom, pos, af).
    /// Files ending in ".gz" are decompressed on the fly.
    /// # Arguments
    /// * `filename` - the frequency file to load
    /// # Errors
    /// * if the file cannot be opened or a record fails to parse
    pub fn from_file(filename: &Path) -> Result<FrequencyTable, Box<dyn std::error::Error>> {
        let file: File = File::open(filename)?;
        let buf_reader = BufReader::new(file);
        let boxed_reader: Box<dyn Read> = if filename.extension().unwrap_or_default() == "gz" {
            Box::new(MultiGzDecoder::new(buf_reader))
        } else {
            Box::new(buf_reader)
        };

        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .from_reader(boxed_reader);

        let mut frequencies: HashMap<(String, u64), f64> = Default::default();
        for record in csv_reader.deserialize() {
            let (chrom, pos, af): (String, u64, f64) = record?;
            frequencies.insert((chrom, pos), af);
        }
        Ok(FrequencyTable { frequencies })
    }

    /// Returns the minor allele frequency at a coordinate, if the table has the site
    pub fn maf(&self, chrom: &str, pos: u64) -> Option<f64> {
        self.frequencies.get(&(chrom.to_string(), pos))
            .map(|&af| af.min(1.0 - af))
    }

    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }
}

/// Chooses the genome-wide orientation of one fragment and applies it uniformly to every
/// member variant (a fragment has one genome-wide phase, not per-variant phases).
/// Variants without input phase contribute no vote; a fragment with no votes at all is
/// left undetermined at confidence 0.5.
/// # Arguments
/// * `evidence` - the evidence set, mutated to record each variant's genome-wide phase
/// * `fragment` - the resolved fragment to orient
/// * `method` - the anchoring method
/// * `frequency_table` - the external frequency source for MAF weighting, if loaded
pub fn anchor_fragment(
    evidence: &mut EvidenceSet,
    fragment: &PhaseFragment,
    method: PhaseMethod,
    frequency_table: Option<&FrequencyTable>
) -> AnchorResult {
    // each vote is the input-phase bit carried by the haplotype-A allele of one variant
    let mut votes: Vec<(usize, u8)> = vec![];
    for (&variant_index, &hap_a_bit) in fragment.variants.iter().zip(fragment.haplotype_1.iter()) {
        if let Some(phase_bit) = evidence.variant(variant_index).input_phase_bit(hap_a_bit) {
            votes.push((variant_index, phase_bit));
        }
    }

    if votes.is_empty() {
        return AnchorResult {
            orientation: Orientation::Undetermined,
            confidence: 0.5
        };
    }

    let result: AnchorResult = match method {
        PhaseMethod::Majority => majority_anchor(&votes),
        PhaseMethod::MafWeighted => {
            let mut weighted: Vec<(u8, f64)> = vec![];
            for &(variant_index, phase_bit) in votes.iter() {
                let variant = evidence.variant(variant_index);
                let maf: Option<f64> = match frequency_table {
                    Some(table) => table.maf(variant.chrom(), variant.position())
                        .or_else(|| variant.maf()),
                    None => variant.maf()
                };
                weighted.push((phase_bit, maf.unwrap_or(0.0)));
            }

            let total_weight: f64 = weighted.iter().map(|&(_, w)| w).sum();
            if total_weight > 0.0 {
                maf_weighted_anchor(&weighted)
            } else {
                // no frequency mass anywhere in the fragment, vote unweighted instead
                debug!("no allele frequency data for any variant in fragment, falling back to majority anchoring");
                majority_anchor(&votes)
            }
        }
    };

    // the orientation applies to the whole fragment at once
    if result.orientation != Orientation::Undetermined {
        for (&variant_index, &hap_a_bit) in fragment.variants.iter().zip(fragment.haplotype_1.iter()) {
            let allele0_bit: u8 = match result.orientation {
                Orientation::AsLabeled => hap_a_bit,
                Orientation::Flipped => 1 - hap_a_bit,
                Orientation::Undetermined => unreachable!()
            };
            evidence.variant_mut(variant_index).set_gw_phase(allele0_bit, result.confidence);
        }
    }
    result
}

/// Orients by the most common phase bit; an exact 0.5 mean is a no-consensus case that
/// keeps the fragment's existing labeling.
fn majority_anchor(votes: &[(usize, u8)]) -> AnchorResult {
    let mean: f64 = votes.iter().map(|&(_, bit)| bit as f64).sum::<f64>() / votes.len() as f64;
    let orientation: Orientation = if mean < 0.5 {
        Orientation::AsLabeled
    } else if mean > 0.5 {
        Orientation::Flipped
    } else {
        debug!("no genome-wide phasing consensus across {} phased variants, keeping block orientation", votes.len());
        Orientation::AsLabeled
    };
    AnchorResult {
        orientation,
        confidence: mean.max(1.0 - mean)
    }
}

/// Orients by frequency-weighted vote totals
fn maf_weighted_anchor(weighted_votes: &[(u8, f64)]) -> AnchorResult {
    let mut support: [f64; 2] = [0.0; 2];
    for &(phase_bit, weight) in weighted_votes.iter() {
        support[phase_bit as usize] += weight;
    }

    let total: f64 = support[0] + support[1];
    let orientation: Orientation = if support[0] > support[1] {
        Orientation::AsLabeled
    } else if support[1] > support[0] {
        Orientation::Flipped
    } else {
        debug!("frequency-weighted genome-wide phasing support is tied, keeping block orientation");
        Orientation::AsLabeled
    };
    AnchorResult {
        orientation,
        confidence: support[0].max(support[1]) / total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::observations::read_observations;
    use std::io::Cursor;

    /// Builds evidence from (variant_id, genotype, maf) definitions, one dummy read each
    fn build_evidence(definitions: &[(&str, &str, &str)]) -> EvidenceSet {
        let mut evidence = EvidenceSet::new();
        for (i, (variant_id, genotype, maf)) in definitions.iter().enumerate() {
            let tsv = format!("r{}\t{}\t.\tX\t60\t{}\t{}\n", i, variant_id, genotype, maf);
            let observations = read_observations(Cursor::new(tsv)).unwrap();
            evidence.add_observation(&observations[0], "_").unwrap();
        }
        evidence
    }

    fn make_fragment(variants: Vec<usize>, haplotype_1: Vec<u8>) -> PhaseFragment {
        let haplotype_2: Vec<u8> = haplotype_1.iter().map(|&b| 1 - b).collect();
        PhaseFragment { variants, haplotype_1, haplotype_2 }
    }

    #[test]
    fn test_unanimous_majority() {
        // every variant's haplotype-A allele sits on input haplotype 0
        let mut evidence = build_evidence(&[
            ("chr1_100_A_C", "0|1", "None"),
            ("chr1_200_G_T", "0|1", "None"),
            ("chr1_300_T_A", "1|0", "None"),
        ]);
        // variant 2 has its allele 1 on input haplotype 0, so hap A takes its allele 1
        let fragment = make_fragment(vec![0, 1, 2], vec![0, 0, 1]);
        let result = anchor_fragment(&mut evidence, &fragment, PhaseMethod::Majority, None);

        assert_eq!(result.orientation, Orientation::AsLabeled);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.orientation.block_phase_string(), "0|1");
        // the orientation lands on every variant uniformly
        assert_eq!(evidence.variant(0).gw_phase_bit(0), Some(0));
        assert_eq!(evidence.variant(0).gw_phase_bit(1), Some(1));
        assert_eq!(evidence.variant(2).gw_phase_bit(1), Some(0));
        assert_eq!(evidence.variant(1).gw_confidence(), 1.0);
    }

    #[test]
    fn test_flipped_majority() {
        let mut evidence = build_evidence(&[
            ("chr1_100_A_C", "1|0", "None"),
            ("chr1_200_G_T", "1|0", "None"),
        ]);
        let fragment = make_fragment(vec![0, 1], vec![0, 0]);
        let result = anchor_fragment(&mut evidence, &fragment, PhaseMethod::Majority, None);

        assert_eq!(result.orientation, Orientation::Flipped);
        assert_eq!(result.confidence, 1.0);
        // haplotype A (allele 0) is genome-wide haplotype 1
        assert_eq!(evidence.variant(0).gw_phase_bit(0), Some(1));
    }

    #[test]
    fn test_no_consensus() {
        let mut evidence = build_evidence(&[
            ("chr1_100_A_C", "0|1", "None"),
            ("chr1_200_G_T", "1|0", "None"),
        ]);
        let fragment = make_fragment(vec![0, 1], vec![0, 0]);
        let result = anchor_fragment(&mut evidence, &fragment, PhaseMethod::Majority, None);

        assert_eq!(result.orientation, Orientation::AsLabeled);
        assert_eq!(result.confidence, 0.5);
    }

    #[test]
    fn test_undetermined_without_input_phase() {
        let mut evidence = build_evidence(&[
            ("chr1_100_A_C", "0/1", "None"),
            ("chr1_200_G_T", "0/1", "None"),
        ]);
        let fragment = make_fragment(vec![0, 1], vec![0, 0]);
        let result = anchor_fragment(&mut evidence, &fragment, PhaseMethod::Majority, None);

        assert_eq!(result.orientation, Orientation::Undetermined);
        assert_eq!(result.confidence, 0.5);
        assert_eq!(result.orientation.block_phase_string(), "0/1");
        assert_eq!(evidence.variant(0).gw_phase_bit(0), None);
        assert_eq!(evidence.variant(0).gw_confidence(), 0.5);
    }

    #[test]
    fn test_maf_weighted() {
        // the two variants disagree; the heavier MAF wins the weighted vote
        let mut evidence = build_evidence(&[
            ("chr1_100_A_C", "0|1", "0.4"),
            ("chr1_200_G_T", "1|0", "0.1"),
        ]);
        let fragment = make_fragment(vec![0, 1], vec![0, 0]);
        let result = anchor_fragment(&mut evidence, &fragment, PhaseMethod::MafWeighted, None);

        assert_eq!(result.orientation, Orientation::AsLabeled);
        assert!((result.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_maf_weighted_table_override() {
        let mut evidence = build_evidence(&[
            ("chr1_100_A_C", "0|1", "0.4"),
            ("chr1_200_G_T", "1|0", "0.1"),
        ]);
        // the table flips the weighting: 0.9 becomes MAF 0.1, and 0.45 outweighs it
        let mut table = FrequencyTable::default();
        table.frequencies.insert(("chr1".to_string(), 100), 0.9);
        table.frequencies.insert(("chr1".to_string(), 200), 0.45);
        assert_eq!(table.maf("chr1", 100), Some(0.1));

        let fragment = make_fragment(vec![0, 1], vec![0, 0]);
        let result = anchor_fragment(&mut evidence, &fragment, PhaseMethod::MafWeighted, Some(&table));

        assert_eq!(result.orientation, Orientation::Flipped);
        assert!((result.confidence - 0.45 / 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_maf_weighted_fallback() {
        // no frequency anywhere: falls back to the unweighted majority
        let mut evidence = build_evidence(&[
            ("chr1_100_A_C", "0|1", "None"),
            ("chr1_200_G_T", "0|1", "None"),
        ]);
        let fragment = make_fragment(vec![0, 1], vec![0, 0]);
        let result = anchor_fragment(&mut evidence, &fragment, PhaseMethod::MafWeighted, None);

        assert_eq!(result.orientation, Orientation::AsLabeled);
        assert_eq!(result.confidence, 1.0);
    }
}
