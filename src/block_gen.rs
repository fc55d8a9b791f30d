
use crate::connectivity::OverlapMap;
use crate::evidence::EvidenceSet;

use log::debug;
use rustc_hash::FxHashSet as HashSet;

/// One connected component of the pruned variant graph: a candidate haplotype block.
/// The variant list is sorted by genomic position and frozen before phasing.
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Block {
    // NOTE: order matters here because we're deriving the comparisons
    /// An index of the block, important for maintaining output order downstream.
    block_index: usize,
    /// The chromosome of the block.
    chrom: String,
    /// The coordinate of the first variant in the block, inclusive.
    start: u64,
    /// The coordinate of the last variant in the block, inclusive.
    end: u64,
    /// The member variant indices, sorted by position.
    variants: Vec<usize>
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // main purpose of custom was to munge the coordinates into a single string
        f.debug_struct("Block")
            .field("block_index", &self.block_index)
            .field("coordinates", &format!("{}:{}-{}", self.chrom, self.start, self.end))
            .field("num_variants", &self.variants.len())
            .finish()
    }
}

impl Block {
    /// Creates a block from a sorted member list.
    /// # Arguments
    /// * `block_index` - the index of this block
    /// * `chrom` - the chromosome of the block
    /// * `variants` - the member variant indices, already sorted by position
    /// * `evidence` - the evidence set, used to pull the boundary coordinates
    /// # Panics
    /// * if the member list is empty
    pub fn new(block_index: usize, chrom: String, variants: Vec<usize>, evidence: &EvidenceSet) -> Block {
        assert!(!variants.is_empty());
        let start: u64 = evidence.variant(variants[0]).position();
        let end: u64 = evidence.variant(*variants.last().unwrap()).position();
        Block {
            block_index,
            chrom,
            start,
            end,
            variants
        }
    }

    pub fn get_block_index(&self) -> usize {
        self.block_index
    }

    pub fn set_block_index(&mut self, new_index: usize) {
        self.block_index = new_index;
    }

    pub fn get_chrom(&self) -> &str {
        &self.chrom
    }

    pub fn get_start(&self) -> u64 {
        self.start
    }

    pub fn get_end(&self) -> u64 {
        self.end
    }

    pub fn variants(&self) -> &[usize] {
        &self.variants
    }

    pub fn get_num_variants(&self) -> usize {
        self.variants.len()
    }

    /// Returns the number of contained base pairs in the block.
    pub fn bp_len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Computes the connected components of a pruned overlap map and emits them as blocks.
/// Seeding always starts from the lowest-coordinate unvisited variant, so the output
/// order (and the block indices) are deterministic for a given graph.
/// # Arguments
/// * `evidence` - the aggregated evidence
/// * `chrom` - the chromosome these variants live on
/// * `overlap_map` - the pruned co-observation graph for the chromosome
/// * `first_block_index` - the index to assign to the first emitted block
pub fn assemble_blocks(
    evidence: &EvidenceSet,
    chrom: &str,
    overlap_map: &OverlapMap,
    first_block_index: usize
) -> Vec<Block> {
    // deterministic traversal: pool sorted by coordinate, ties broken by variant index
    let mut pool: Vec<usize> = overlap_map.keys().copied().collect();
    pool.sort_by_key(|&v| (evidence.variant(v).position(), v));

    let mut visited: HashSet<usize> = Default::default();
    let mut blocks: Vec<Block> = vec![];

    for &seed in pool.iter() {
        if visited.contains(&seed) {
            continue;
        }

        // transitively union everything reachable from the seed
        let mut members: Vec<usize> = vec![];
        let mut worklist: Vec<usize> = vec![seed];
        visited.insert(seed);
        while let Some(variant_index) = worklist.pop() {
            members.push(variant_index);
            if let Some(connected) = overlap_map.get(&variant_index) {
                for &other in connected.iter() {
                    if visited.insert(other) {
                        worklist.push(other);
                    }
                }
            }
        }

        members.sort_by_key(|&v| (evidence.variant(v).position(), v));
        blocks.push(Block::new(first_block_index + blocks.len(), chrom.to_string(), members, evidence));
    }

    debug!("chromosome {}: {} variants assembled into {} blocks", chrom, visited.len(), blocks.len());
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::build_overlap_map;
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
    fn test_assemble_blocks() {
        // two components: {100, 200, 300} chained and {500, 600}; 700 is isolated
        let evidence = build_evidence(&[
            ("r1", "chr1_100_A_C", "A", "0|1"),
            ("r1", "chr1_200_G_T", "G", "0|1"),
            ("r2", "chr1_200_G_T", "T", "0|1"),
            ("r2", "chr1_300_T_A", "A", "0|1"),
            ("r3", "chr1_500_C_G", "C", "0|1"),
            ("r3", "chr1_600_A_T", "A", "0|1"),
            ("r4", "chr1_700_G_C", "G", "0|1"),
        ]);
        let overlap_map = build_overlap_map(&evidence, "chr1");
        let blocks = assemble_blocks(&evidence, "chr1", &overlap_map, 5);

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].get_block_index(), 5);
        assert_eq!(blocks[0].get_num_variants(), 3);
        assert_eq!(blocks[0].get_start(), 100);
        assert_eq!(blocks[0].get_end(), 300);
        assert_eq!(blocks[1].get_block_index(), 6);
        assert_eq!(blocks[1].variants().len(), 2);
        assert_eq!(blocks[1].bp_len(), 101);

        // members are sorted by position within each block
        let positions: Vec<u64> = blocks[0].variants().iter()
            .map(|&v| evidence.variant(v).position())
            .collect();
        assert_eq!(positions, vec![100, 200, 300]);
    }

    #[test]
    fn test_block_partition() {
        // every connected variant lands in exactly one block
        let evidence = build_evidence(&[
            ("r1", "chr1_100_A_C", "A", "0|1"),
            ("r1", "chr1_200_G_T", "G", "0|1"),
            ("r2", "chr1_300_T_A", "T", "0|1"),
            ("r2", "chr1_400_C_G", "C", "0|1"),
            ("r3", "chr1_200_G_T", "G", "0|1"),
            ("r3", "chr1_300_T_A", "T", "0|1"),
        ]);
        let overlap_map = build_overlap_map(&evidence, "chr1");
        let blocks = assemble_blocks(&evidence, "chr1", &overlap_map, 0);

        assert_eq!(blocks.len(), 1);
        let mut seen: Vec<usize> = vec![];
        for block in blocks.iter() {
            seen.extend_from_slice(block.variants());
        }
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), evidence.num_variants());
    }
}
