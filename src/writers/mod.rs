
/// Writer for the per-pair connection test records
pub mod connection_writer;
/// Writer for the per-haplotype read counts consumed by ASE analysis
pub mod counts_writer;
/// Writers for the per-fragment haplotype rows and the per-variant phase annotations
pub mod haplotype_writer;
/// Writer for the allele connectivity network of a selected variant
pub mod network_writer;
