
/// Genome-wide phase anchoring of phased blocks against population phase and allele frequency data
pub mod anchor;
/// Assembles the pruned connectivity graph into position-sorted haplotype blocks
pub mod block_gen;
/// CLI functionality and checks
pub mod cli;
/// Builds the variant co-observation graph and statistically prunes noise-driven edges
pub mod connectivity;
/// Contains multiple wrappers for useful data types in haplink
pub mod data_types;
/// Aggregates per-read allele observations into per-variant evidence and estimates sequencing noise
pub mod evidence;
/// Resolves the two-haplotype configuration of each block, splitting and re-stitching oversized blocks
pub mod phaser;
/// Contains all the various output writer functionality
pub mod writers;
